use super::featured::FeaturedFlag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// キャッシュする 5 種類の投稿一覧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListCategory {
    FirstPage,
    Weekly,
    Legend,
    Notice,
    Realtime,
}

impl ListCategory {
    pub const ALL: [ListCategory; 5] = [
        ListCategory::FirstPage,
        ListCategory::Weekly,
        ListCategory::Legend,
        ListCategory::Notice,
        ListCategory::Realtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListCategory::FirstPage => "first-page",
            ListCategory::Weekly => "weekly",
            ListCategory::Legend => "legend",
            ListCategory::Notice => "notice",
            ListCategory::Realtime => "realtime",
        }
    }

    pub fn cache_key(&self) -> String {
        format!("posts:list:{}", self.as_str())
    }

    pub fn featured_flag(&self) -> Option<FeaturedFlag> {
        match self {
            ListCategory::Weekly => Some(FeaturedFlag::Weekly),
            ListCategory::Legend => Some(FeaturedFlag::Legend),
            ListCategory::Notice => Some(FeaturedFlag::Notice),
            ListCategory::FirstPage | ListCategory::Realtime => None,
        }
    }

    pub fn from_featured(flag: FeaturedFlag) -> Option<Self> {
        match flag {
            FeaturedFlag::Weekly => Some(ListCategory::Weekly),
            FeaturedFlag::Legend => Some(ListCategory::Legend),
            FeaturedFlag::Notice => Some(ListCategory::Notice),
            FeaturedFlag::None => None,
        }
    }
}

impl fmt::Display for ListCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
