mod common;

use common::harness;
use popularity_sync::application::ports::post_store::PostStore;
use popularity_sync::domain::entities::{CounterKind, FeaturedFlag, ListCategory};
use std::collections::HashMap;

#[tokio::test]
async fn legend_takes_over_weekly_posts_but_not_notices() {
    let mut h = harness().await;
    let ids = h.seed_posts(4).await;
    let (star, rising, pinned, quiet) = (ids[0], ids[1], ids[2], ids[3]);

    let threshold = h.config.featured.legend_like_threshold;
    h.posts
        .bulk_increment_counter(
            &HashMap::from([(star, threshold), (rising, 3), (pinned, threshold)]),
            CounterKind::Like,
        )
        .await
        .unwrap();
    h.db.set_flag_for_post(pinned, FeaturedFlag::Notice)
        .await
        .unwrap();

    // 週間のみ先に実行すると star は WEEKLY になる
    let weekly = h.posts.find_weekly_popular().await.unwrap();
    let weekly_ids: Vec<i64> = weekly.iter().map(|post| post.post_id).collect();
    assert!(weekly_ids.contains(&star));
    assert!(!weekly_ids.contains(&quiet));
    h.posts
        .replace_featured_flags(FeaturedFlag::Weekly, &weekly_ids)
        .await
        .unwrap();
    assert!(
        h.posts
            .find_featured_ids(FeaturedFlag::Weekly)
            .await
            .unwrap()
            .contains(&star)
    );

    let outcome = h.coordinator.refresh_featured().await;
    assert!(outcome.is_clean(), "{outcome:?}");

    let legend = h.posts.find_featured_ids(FeaturedFlag::Legend).await.unwrap();
    let weekly = h.posts.find_featured_ids(FeaturedFlag::Weekly).await.unwrap();
    let notices = h.posts.find_featured_ids(FeaturedFlag::Notice).await.unwrap();
    assert_eq!(legend, vec![star]);
    assert_eq!(weekly, vec![rising]);
    assert_eq!(notices, vec![pinned]);

    assert_eq!(h.cached_ids(ListCategory::Legend).await.unwrap().len(), 2);

    let notified: Vec<(i64, FeaturedFlag)> = h
        .drain_notifications()
        .into_iter()
        .map(|n| (n.post_id, n.category))
        .collect();
    // rising と star は既に WEEKLY だったので、新たに付いた LEGEND だけが通知される
    assert_eq!(notified, vec![(star, FeaturedFlag::Legend)]);
}

#[tokio::test]
async fn repeated_ticks_are_idempotent_and_quiet() {
    let mut h = harness().await;
    let ids = h.seed_posts(2).await;
    h.posts
        .bulk_increment_counter(&HashMap::from([(ids[0], 2), (ids[1], 1)]), CounterKind::View)
        .await
        .unwrap();

    assert!(h.coordinator.refresh_featured().await.is_clean());
    let first = h.drain_notifications();
    assert_eq!(first.len(), 2);

    assert!(h.coordinator.refresh_featured().await.is_clean());
    assert!(h.drain_notifications().is_empty());
    assert_eq!(
        h.posts.find_featured_ids(FeaturedFlag::Weekly).await.unwrap(),
        vec![ids[0], ids[1]]
    );
    assert_eq!(
        h.cached_ids(ListCategory::Weekly).await,
        Some(vec![ids[0], ids[1]])
    );
}
