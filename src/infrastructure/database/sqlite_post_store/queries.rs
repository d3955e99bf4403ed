pub(super) const SELECT_POSTS_BY_CURSOR: &str = r#"
    SELECT id, title, view_count, like_count, comment_count, created_at, author_id, author_name
    FROM posts
    WHERE (?1 IS NULL OR id < ?1)
    ORDER BY id DESC
    LIMIT ?2
"#;

pub(super) const SELECT_WEEKLY_POPULAR: &str = r#"
    SELECT id, title, view_count, like_count, comment_count, created_at, author_id, author_name
    FROM posts
    WHERE created_at >= ?1
      AND (view_count + like_count + comment_count) > 0
    ORDER BY (view_count * ?2 + like_count * ?3 + comment_count * ?4) DESC, id DESC
    LIMIT ?5
"#;

pub(super) const SELECT_LEGENDARY: &str = r#"
    SELECT id, title, view_count, like_count, comment_count, created_at, author_id, author_name
    FROM posts
    WHERE like_count >= ?1
    ORDER BY like_count DESC, id DESC
    LIMIT ?2
"#;

pub(super) const SELECT_NOTICES: &str = r#"
    SELECT id, title, view_count, like_count, comment_count, created_at, author_id, author_name
    FROM posts
    WHERE featured = 'NOTICE'
    ORDER BY id DESC
"#;

pub(super) const SELECT_SUMMARIES_BY_IDS_PREFIX: &str = r#"
    SELECT id, title, view_count, like_count, comment_count, created_at, author_id, author_name
    FROM posts
    WHERE id IN ("#;

pub(super) const SELECT_POST_DETAIL: &str = r#"
    SELECT id, title, content, view_count, like_count, comment_count, created_at,
           author_id, author_name, featured
    FROM posts
    WHERE id = ?1
"#;

pub(super) const SELECT_FEATURED_IDS: &str = r#"
    SELECT id
    FROM posts
    WHERE featured = ?1
    ORDER BY id
"#;

pub(super) const CLEAR_FEATURED_FLAG: &str = r#"
    UPDATE posts
    SET featured = 'NONE'
    WHERE featured = ?1
"#;

pub(super) const INSERT_POST: &str = r#"
    INSERT INTO posts (title, content, author_id, author_name, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
"#;

pub(super) const DELETE_POST: &str = r#"
    DELETE FROM posts
    WHERE id = ?1
"#;

pub(super) const UPDATE_FEATURED_FLAG_BY_ID: &str = r#"
    UPDATE posts
    SET featured = ?2
    WHERE id = ?1
"#;
