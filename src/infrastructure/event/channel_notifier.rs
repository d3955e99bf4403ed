use crate::application::ports::notifier::FeaturedNotifier;
use crate::domain::entities::FeaturedNotification;
use crate::shared::error::AppError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 通知をチャネルへ流すだけの `FeaturedNotifier`。
/// 配信は受信側（別サービスへの転送など）に任せる
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<FeaturedNotification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FeaturedNotification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl FeaturedNotifier for ChannelNotifier {
    async fn notify_featured(&self, notification: FeaturedNotification) -> Result<(), AppError> {
        self.sender
            .send(notification)
            .await
            .map_err(|_| AppError::Internal("notification channel closed".to_string()))
    }
}

/// 受け取った通知をログに出し続けるタスクを起動する
pub fn spawn_logging_consumer(
    mut receiver: mpsc::Receiver<FeaturedNotification>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut delivered = 0u64;
        while let Some(notification) = receiver.recv().await {
            delivered += 1;
            match serde_json::to_string(&notification) {
                Ok(payload) => tracing::info!(
                    target: "popularity::notify",
                    author_id = notification.author_id,
                    post_id = notification.post_id,
                    payload = %payload,
                    "featured notification"
                ),
                Err(err) => tracing::warn!(
                    target: "popularity::notify",
                    post_id = notification.post_id,
                    error = %err,
                    "failed to serialize featured notification"
                ),
            }
        }
        delivered
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::FeaturedFlag;

    fn notification(post_id: i64) -> FeaturedNotification {
        FeaturedNotification {
            author_id: 1,
            post_id,
            category: FeaturedFlag::Weekly,
            message: FeaturedFlag::Weekly.notification_message().to_string(),
        }
    }

    #[tokio::test]
    async fn forwards_notifications_in_order() {
        let (notifier, mut receiver) = ChannelNotifier::new(4);
        notifier.notify_featured(notification(1)).await.unwrap();
        notifier.notify_featured(notification(2)).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().post_id, 1);
        assert_eq!(receiver.recv().await.unwrap().post_id, 2);
    }

    #[tokio::test]
    async fn closed_channel_is_an_error() {
        let (notifier, receiver) = ChannelNotifier::new(1);
        drop(receiver);
        assert!(notifier.notify_featured(notification(1)).await.is_err());
    }

    #[tokio::test]
    async fn logging_consumer_counts_deliveries() {
        let (notifier, receiver) = ChannelNotifier::new(4);
        let consumer = spawn_logging_consumer(receiver);
        notifier.notify_featured(notification(1)).await.unwrap();
        notifier.notify_featured(notification(2)).await.unwrap();
        drop(notifier);

        assert_eq!(consumer.await.unwrap(), 2);
    }
}
