use crate::domain::entities::FeaturedNotification;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// 注目投稿通知の発行先（配信方法はこのクレートの外側）
#[async_trait]
pub trait FeaturedNotifier: Send + Sync {
    async fn notify_featured(&self, notification: FeaturedNotification) -> Result<(), AppError>;
}
