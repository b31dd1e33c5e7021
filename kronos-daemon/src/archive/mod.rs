//! Archive builder - turns a unit's input paths into one dated archive.
//!
//! On-disk layout: `<output>/<unit>/<YYYY-MM>/<DD-HH:MM>-<unit>.<ext>`.
//! Every input is stored under its own base directory name; inputs that
//! share a base name are disambiguated with a `-<n>` suffix.

pub mod writer;

use crate::config::BackupUnit;
use crate::fs::exclude::ExcludeSet;
use crate::fs::walker::{walk_directory_with_callback, WalkOptions};
use crate::utils::errors::{KeeperError, Result};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
pub use writer::CompressFormat;

/// Parameters of one archive build
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    /// Unit name; names the unit directory and suffixes the archive file
    pub archive_name: String,
    pub input_paths: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub exclude: Vec<String>,
}

/// Location of a finished archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// File name, e.g. `23-10:34-db.zip`
    pub archive_name: String,
    /// Directory holding the archive (the date partition)
    pub archive_path: PathBuf,
    /// Date partition segment, e.g. `2024-02`
    pub year_month: String,
}

impl Archive {
    pub fn full_path(&self) -> PathBuf {
        self.archive_path.join(&self.archive_name)
    }
}

impl ArchiveBuilder {
    pub fn from_unit(unit: &BackupUnit) -> Self {
        Self {
            archive_name: unit.name.clone(),
            input_paths: unit.input_paths.clone(),
            output_path: unit.output_path.clone(),
            exclude: unit.compress_exclude.clone(),
        }
    }

    /// Build the archive stamped with the current local time.
    pub fn build(&self, format: &str) -> Result<Archive> {
        self.build_at(format, Local::now())
    }

    /// Build the archive stamped with `now`.
    ///
    /// Parameters are checked before anything is written. Any error after
    /// that aborts the build and leaves partial output in place.
    pub fn build_at(&self, format: &str, now: DateTime<Local>) -> Result<Archive> {
        self.validate()?;
        let format: CompressFormat = format.parse()?;
        let exclude = ExcludeSet::new(&self.exclude)?;

        let unit_dir = ensure_dir(&self.output_path, &self.archive_name)?;
        let year_month = now.format("%Y-%m").to_string();
        let archive_path = ensure_dir(&unit_dir, &year_month)?;

        let archive_name = format!(
            "{}-{}.{}",
            now.format("%d-%H:%M"),
            self.archive_name,
            format.extension()
        );
        let target = archive_path.join(&archive_name);

        info!(
            "Creating {} archive {} from {} input path(s)",
            format.extension(),
            target.display(),
            self.input_paths.len()
        );

        let roots = self.input_roots()?;
        let options = WalkOptions {
            follow_links: false,
            exclude,
            skip_dirs: output_dirs(&unit_dir, &archive_path, &roots)?,
        };

        let mut writer = format.create(&target)?;
        let mut entries = 0usize;
        for (input, root_name) in roots {
            debug!("Archiving {} as {}", input.display(), root_name);
            walk_directory_with_callback(&input, &root_name, &options, |entry| {
                entries += 1;
                if entry.is_dir {
                    writer.add_dir(entry)
                } else {
                    writer.add_file(entry)
                }
            })?;
        }
        writer.finish()?;

        info!("Archive {} written ({} entries)", target.display(), entries);

        Ok(Archive {
            archive_name,
            archive_path,
            year_month,
        })
    }

    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.archive_name.trim().is_empty() {
            missing.push("archive name");
        }
        if self.input_paths.is_empty() {
            missing.push("input paths");
        }
        if self.output_path.as_os_str().is_empty() {
            missing.push("output path");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(KeeperError::Config(format!(
                "cannot build archive, missing {}",
                missing.join(", ")
            )))
        }
    }

    /// Canonical input paths paired with their root name inside the archive.
    fn input_roots(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut roots = Vec::with_capacity(self.input_paths.len());

        for input in &self.input_paths {
            let input = canonical(input)?;
            let base = input
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "root".to_string());

            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            let root_name = if *count == 1 {
                base
            } else {
                format!("{}-{}", base, count)
            };
            roots.push((input, root_name));
        }

        Ok(roots)
    }
}

/// Directories holding this unit's archives, never walked into. When the
/// unit directory is itself an input root only its date partitions are
/// skipped, so the rest of the input is still archived.
fn output_dirs(unit_dir: &Path, archive_path: &Path, roots: &[(PathBuf, String)]) -> Result<Vec<PathBuf>> {
    let unit_dir = canonical(unit_dir)?;
    let mut dirs = vec![unit_dir.clone(), canonical(archive_path)?];

    if roots.iter().any(|(input, _)| *input == unit_dir) {
        let listing = std::fs::read_dir(&unit_dir).map_err(|e| KeeperError::filesystem(&unit_dir, e))?;
        for entry in listing {
            let entry = entry.map_err(|e| KeeperError::filesystem(&unit_dir, e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && is_partition_name(&entry.file_name().to_string_lossy()) {
                dirs.push(entry.path());
            }
        }
    }

    Ok(dirs)
}

/// `YYYY-MM`
fn is_partition_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || b.is_ascii_digit())
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|e| KeeperError::filesystem(path, e))
}

/// Make sure `<parent>/<name>` exists and return it.
fn ensure_dir(parent: &Path, name: &str) -> Result<PathBuf> {
    let dir = parent.join(name);
    if !dir.is_dir() {
        std::fs::create_dir_all(&dir).map_err(|e| KeeperError::filesystem(&dir, e))?;
        debug!("Created directory {}", dir.display());
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::{self, File};
    use std::io::Read;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 2, 23, 10, 34, 0).unwrap()
    }

    fn zip_names(path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    fn builder(name: &str, inputs: Vec<PathBuf>, output: &Path, exclude: &[&str]) -> ArchiveBuilder {
        ArchiveBuilder {
            archive_name: name.to_string(),
            input_paths: inputs,
            output_path: output.to_path_buf(),
            exclude: exclude.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_layout_and_exclusions() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data/db");
        let backups = temp.path().join("backups");
        fs::create_dir_all(&data).unwrap();
        fs::create_dir_all(&backups).unwrap();
        fs::write(data.join("a.sql"), b"select 1;").unwrap();
        fs::write(data.join("b.tmp"), b"scratch").unwrap();

        let archive = builder("db", vec![data], &backups, &["*.tmp"])
            .build_at("zip", fixed_time())
            .unwrap();

        assert_eq!(archive.year_month, "2024-02");
        assert_eq!(archive.archive_name, "23-10:34-db.zip");
        assert_eq!(archive.archive_path, backups.join("db").join("2024-02"));
        assert!(archive.full_path().is_file());
        assert_eq!(zip_names(&archive.full_path()), vec!["db/", "db/a.sql"]);
    }

    #[test]
    fn test_zero_length_files_keep_their_entry() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("site");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("empty.txt"), b"").unwrap();
        fs::write(data.join("full.txt"), b"hello").unwrap();

        let archive = builder("site", vec![data], temp.path(), &[])
            .build_at("zip", fixed_time())
            .unwrap();

        let mut zip = zip::ZipArchive::new(File::open(archive.full_path()).unwrap()).unwrap();
        assert_eq!(zip.by_name("site/empty.txt").unwrap().size(), 0);

        let mut content = String::new();
        zip.by_name("site/full.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_missing_parameters_are_config_errors() {
        let temp = TempDir::new().unwrap();
        let input = vec![temp.path().to_path_buf()];
        let cases = vec![
            builder("", input.clone(), temp.path(), &[]),
            builder("db", vec![], temp.path(), &[]),
            builder("db", input.clone(), Path::new(""), &[]),
            builder("", vec![], Path::new(""), &[]),
        ];

        for case in cases {
            let err = case.build_at("zip", fixed_time()).unwrap_err();
            assert!(matches!(err, KeeperError::Config(_)), "unexpected error: {}", err);
        }
        // Nothing was created for any rejected build
        assert!(!temp.path().join("db").exists());
    }

    #[test]
    fn test_unsupported_format_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        fs::create_dir_all(&data).unwrap();

        let err = builder("db", vec![data], temp.path(), &[])
            .build_at("rar", fixed_time())
            .unwrap_err();
        assert!(matches!(err, KeeperError::UnsupportedFormat(_)));
        assert!(!temp.path().join("db").exists());
    }

    #[test]
    fn test_broken_input_path_fails_build() {
        let temp = TempDir::new().unwrap();
        let err = builder("db", vec![temp.path().join("missing")], temp.path(), &[])
            .build_at("zip", fixed_time())
            .unwrap_err();
        assert!(matches!(err, KeeperError::Filesystem { .. }));
    }

    #[test]
    fn test_duplicate_base_names_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("a/conf");
        let second = temp.path().join("b/conf");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("app.toml"), b"1").unwrap();
        fs::write(second.join("app.toml"), b"2").unwrap();

        let archive = builder("etc", vec![first, second], temp.path(), &[])
            .build_at("zip", fixed_time())
            .unwrap();

        assert_eq!(
            zip_names(&archive.full_path()),
            vec!["conf-2/", "conf-2/app.toml", "conf/", "conf/app.toml"]
        );
    }

    #[test]
    fn test_output_inside_input_is_not_archived() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        fs::create_dir_all(&home).unwrap();
        fs::write(home.join("notes.md"), b"x").unwrap();

        let unit = builder("home", vec![home.clone()], &home, &[]);
        unit.build_at("zip", fixed_time()).unwrap();
        let later = Local.with_ymd_and_hms(2024, 2, 23, 11, 0, 0).unwrap();
        let archive = unit.build_at("zip", later).unwrap();

        assert_eq!(zip_names(&archive.full_path()), vec!["home/", "home/notes.md"]);
    }

    #[test]
    fn test_unit_dir_as_input_root_skips_partitions() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let db = data.join("db");
        fs::create_dir_all(db.join("schemas")).unwrap();
        fs::write(db.join("a.sql"), b"select 1;").unwrap();
        fs::write(db.join("schemas/main.sql"), b"create table t();").unwrap();

        let unit = builder("db", vec![db.clone()], &data, &[]);
        let january = Local.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap();
        unit.build_at("zip", january).unwrap();
        unit.build_at("zip", fixed_time()).unwrap();
        let later = Local.with_ymd_and_hms(2024, 2, 23, 11, 0, 0).unwrap();
        let archive = unit.build_at("zip", later).unwrap();

        assert_eq!(archive.archive_path, db.join("2024-02"));
        assert_eq!(
            zip_names(&archive.full_path()),
            vec!["db/", "db/a.sql", "db/schemas/", "db/schemas/main.sql"]
        );
    }

    #[test]
    fn test_partition_names() {
        assert!(is_partition_name("2024-02"));
        assert!(!is_partition_name("2024-2"));
        assert!(!is_partition_name("schemas"));
        assert!(!is_partition_name("2024_02"));
    }

    #[test]
    fn test_zip_entries_keep_modification_time() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("docs");
        fs::create_dir_all(&data).unwrap();
        let source = data.join("report.txt");
        fs::write(&source, b"q3").unwrap();
        let mtime = Local.with_ymd_and_hms(2023, 5, 17, 8, 30, 20).unwrap();
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(mtime.into())
            .unwrap();

        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let archive = builder("docs", vec![data], &out, &[])
            .build_at("zip", fixed_time())
            .unwrap();

        let mut zip = zip::ZipArchive::new(File::open(archive.full_path()).unwrap()).unwrap();
        let stamp = zip.by_name("docs/report.txt").unwrap().last_modified().unwrap();
        assert_eq!(
            (stamp.year(), stamp.month(), stamp.day()),
            (2023, 5, 17)
        );
        assert_eq!(
            (stamp.hour(), stamp.minute(), stamp.second()),
            (8, 30, 20)
        );
    }

    #[test]
    fn test_rebuild_produces_same_entry_set() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let out_a = temp.path().join("out-a");
        let out_b = temp.path().join("out-b");
        fs::create_dir_all(data.join("nested")).unwrap();
        fs::create_dir_all(&out_a).unwrap();
        fs::create_dir_all(&out_b).unwrap();
        fs::write(data.join("nested/x.bin"), b"xx").unwrap();
        fs::write(data.join("y.log"), b"yy").unwrap();

        let first = builder("u", vec![data.clone()], &out_a, &["*.log"])
            .build_at("zip", fixed_time())
            .unwrap();
        let second = builder("u", vec![data], &out_b, &["*.log"])
            .build_at("zip", fixed_time())
            .unwrap();

        assert_eq!(first.archive_name, second.archive_name);
        assert_eq!(zip_names(&first.full_path()), zip_names(&second.full_path()));
    }

    #[test]
    fn test_tar_gz_archive_is_readable() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("logs");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("app.log"), b"line").unwrap();
        fs::write(data.join("empty.log"), b"").unwrap();

        let archive = builder("logs", vec![data], temp.path(), &[])
            .build_at("tar.gz", fixed_time())
            .unwrap();
        assert_eq!(archive.archive_name, "23-10:34-logs.tar.gz");

        let decoder = flate2::read::GzDecoder::new(File::open(archive.full_path()).unwrap());
        let mut tar = tar::Archive::new(decoder);
        let mut names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| {
                let path = e.unwrap().path().unwrap().to_string_lossy().to_string();
                path.trim_end_matches('/').to_string()
            })
            .collect();
        names.sort();
        assert_eq!(names, vec!["logs", "logs/app.log", "logs/empty.log"]);
    }

    #[test]
    fn test_tar_zst_archive_is_readable() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("cfg");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("main.toml"), b"a = 1").unwrap();

        let archive = builder("cfg", vec![data], temp.path(), &[])
            .build_at("tar.zst", fixed_time())
            .unwrap();

        let decoder = zstd::Decoder::new(File::open(archive.full_path()).unwrap()).unwrap();
        let mut tar = tar::Archive::new(decoder);
        let mut found = String::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().ends_with("main.toml") {
                entry.read_to_string(&mut found).unwrap();
            }
        }
        assert_eq!(found, "a = 1");
    }
}
