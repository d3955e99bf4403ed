mod common;

use common::harness;
use popularity_sync::application::ports::kv_store::KeyValueStore;
use popularity_sync::application::ports::post_store::PostStore;
use popularity_sync::domain::constants::post_detail_key;
use popularity_sync::domain::entities::{ListCategory, PostEvent};
use popularity_sync::infrastructure::database::NewPost;
use popularity_sync::infrastructure::jobs::CounterFlushJob;
use std::sync::Arc;

fn events(lines: &[&str]) -> Vec<PostEvent> {
    lines
        .iter()
        .map(|line| serde_json::from_str(line).expect("event json"))
        .collect()
}

#[tokio::test]
async fn write_path_events_converge_into_caches_and_database() {
    let h = harness().await;
    h.seed_posts(25).await;
    assert!(h.coordinator.refresh_first_page().await.is_clean());
    let capacity = h.config.lists.first_page_capacity();
    assert_eq!(
        h.cached_ids(ListCategory::FirstPage).await.map(|ids| ids.len()),
        Some(capacity)
    );

    let listener = h.listener();
    let fresh = h
        .db
        .insert_post(&NewPost::new("fresh", "newcomer").with_author_id(77))
        .await
        .unwrap();
    let summary = h.posts.find_by_ids(&[fresh]).await.unwrap().remove(0);
    listener.dispatch(PostEvent::Created { summary });
    listener.pools().wait_idle().await;

    let first_page = h.cached_ids(ListCategory::FirstPage).await.unwrap();
    assert_eq!(first_page.first(), Some(&fresh));
    assert_eq!(first_page.len(), capacity);

    let json = [
        format!(r#"{{"type":"viewed","post_id":{fresh},"viewer_key":"alice"}}"#),
        format!(r#"{{"type":"viewed","post_id":{fresh},"viewer_key":"alice"}}"#),
        format!(r#"{{"type":"viewed","post_id":{fresh},"viewer_key":"bob"}}"#),
        format!(r#"{{"type":"like_changed","post_id":{fresh},"delta":1}}"#),
        format!(r#"{{"type":"comment_created","post_id":{fresh}}}"#),
    ];
    let lines: Vec<&str> = json.iter().map(String::as_str).collect();
    for event in events(&lines) {
        listener.dispatch(event);
    }
    listener.pools().wait_idle().await;

    let score = h.ledger.score(fresh).await.unwrap();
    assert!((score - 11.0).abs() < 1e-9);

    let job = CounterFlushJob::new(
        Arc::clone(&h.buffer),
        Arc::clone(&h.posts),
        Arc::clone(&h.lists),
        None,
    );
    job.run_once().await.unwrap();

    let stored = h.posts.find_by_ids(&[fresh]).await.unwrap().remove(0);
    assert_eq!(
        (stored.view_count, stored.like_count, stored.comment_count),
        (2, 1, 1)
    );
    let cached = listener
        .get_cached_list(ListCategory::FirstPage)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(
        (cached.view_count, cached.like_count, cached.comment_count),
        (2, 1, 1)
    );

    assert!(h.coordinator.refresh_all_caches().await.is_clean());
    assert_eq!(
        h.cached_ids(ListCategory::Realtime).await.unwrap().first(),
        Some(&fresh)
    );

    listener.on_post_updated(fresh, "fresh (edited)");
    listener.pools().wait_idle().await;
    let realtime = h.lists.get_cached_list(ListCategory::Realtime).await.unwrap();
    assert_eq!(realtime[0].title, "fresh (edited)");
}

#[tokio::test]
async fn deletion_backfills_first_page_and_forgets_the_post() {
    let h = harness().await;
    let ids = h.seed_posts(30).await;
    assert!(h.coordinator.refresh_first_page().await.is_clean());
    let target = ids[25];
    h.ledger.on_like(target, 1).await;

    let listener = h.listener();
    assert!(listener.get_cached_post_detail(target).await.is_some());
    assert!(h.store.exists(&post_detail_key(target)).await.unwrap());

    h.db.delete_post(target).await.unwrap();
    listener.on_post_deleted(target);
    listener.pools().wait_idle().await;

    let first_page = h.cached_ids(ListCategory::FirstPage).await.unwrap();
    assert_eq!(first_page.len(), h.config.lists.first_page_capacity());
    assert!(!first_page.contains(&target));
    assert!(h.ledger.score(target).await.is_none());
    assert!(!h.store.exists(&post_detail_key(target)).await.unwrap());
    assert!(listener.get_cached_post_detail(target).await.is_none());
}
