//! Operator notifications.

pub mod telegram;

use crate::config::TelegramConfig;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Text message channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Notifier for the configured channel, if any.
pub fn from_config(telegram: Option<&TelegramConfig>) -> Option<Arc<dyn Notifier>> {
    telegram.map(|config| {
        Arc::new(telegram::TelegramNotifier::new(config.clone(), reqwest::Client::new()))
            as Arc<dyn Notifier>
    })
}

/// Send `message` if a notifier is configured. Failures are only logged.
pub async fn notify_best_effort(notifier: Option<&Arc<dyn Notifier>>, message: &str) {
    let Some(notifier) = notifier else {
        return;
    };
    if let Err(e) = notifier.notify(message).await {
        warn!("Notification not delivered: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::KeeperError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingNotifier {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _message: &str) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(KeeperError::Notification("chat not found".into()))
        }
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let failing = Arc::new(FailingNotifier {
            attempts: AtomicUsize::new(0),
        });
        let notifier: Arc<dyn Notifier> = failing.clone();

        notify_best_effort(Some(&notifier), "backup done").await;
        notify_best_effort(None, "backup done").await;

        assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_config() {
        assert!(from_config(None).is_none());
        let config = TelegramConfig {
            token: "123:abc".into(),
            chat_id: "42".into(),
            api_base: "https://api.telegram.org".into(),
        };
        assert!(from_config(Some(&config)).is_some());
    }
}
