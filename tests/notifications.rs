//! Notification consumer wired to a live messaging service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::*;
use inkstream::notification::{Channel, NotificationKind, RenderedNotification};
use inkstream::{HandlerResult, NotificationConsumer, NotificationEvent, NotificationSender};

#[derive(Default)]
struct Outbox {
    emails: Mutex<Vec<RenderedNotification>>,
    pushes: Mutex<Vec<RenderedNotification>>,
    push_failures_left: Mutex<usize>,
}

#[async_trait]
impl NotificationSender for Outbox {
    async fn send_email(&self, notification: &RenderedNotification) -> HandlerResult {
        self.emails.lock().push(notification.clone());
        Ok(())
    }

    async fn send_push(&self, notification: &RenderedNotification) -> HandlerResult {
        {
            let mut left = self.push_failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err("push gateway unavailable".into());
            }
        }
        self.pushes.lock().push(notification.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_published_event_is_rendered_and_delivered() {
    let queue = new_queue();
    let service = new_service(&queue, "notifier", "1");
    let outbox = Arc::new(Outbox::default());
    NotificationConsumer::new(outbox.clone())
        .start(&service)
        .await
        .unwrap();

    let mut event = NotificationEvent::new("u-42", "Hi {{name}}", "");
    event.kind = NotificationKind::Reward;
    event.template = Some("You earned {{points}} points".to_string());
    event.variables.insert("name".to_string(), "Ada".to_string());
    event.variables.insert("points".to_string(), "50".to_string());
    event.channels = vec![Channel::Email, Channel::Push];
    NotificationConsumer::notify(&service, &event).await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || async { outbox.pushes.lock().len() == 1 }).await);
    let emails = outbox.emails.lock().clone();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].title, "Hi Ada");
    assert_eq!(emails[0].body, "You earned 50 points");
    assert_eq!(emails[0].kind, NotificationKind::Reward);
    service.shutdown().await;
}

#[tokio::test]
async fn test_failed_push_is_retried() {
    let queue = new_queue();
    let service = new_service(&queue, "notifier", "1");
    let outbox = Arc::new(Outbox {
        push_failures_left: Mutex::new(1),
        ..Default::default()
    });
    NotificationConsumer::new(outbox.clone())
        .start(&service)
        .await
        .unwrap();

    NotificationConsumer::notify(&service, &NotificationEvent::new("u-1", "Ping", "pong"))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || async { outbox.pushes.lock().len() == 1 }).await);
    assert_eq!(outbox.pushes.lock()[0].body, "pong");
    assert_eq!(service.metrics().handler_failures, 1);
    service.shutdown().await;
}
