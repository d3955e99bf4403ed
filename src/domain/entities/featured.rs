use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 投稿行に付く注目フラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeaturedFlag {
    #[default]
    None,
    Weekly,
    Legend,
    Notice,
}

impl FeaturedFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeaturedFlag::None => "NONE",
            FeaturedFlag::Weekly => "WEEKLY",
            FeaturedFlag::Legend => "LEGEND",
            FeaturedFlag::Notice => "NOTICE",
        }
    }

    /// このフラグを付与するときに上書きしてよい既存フラグ。
    /// WEEKLY は LEGEND/NOTICE を上書きせず、LEGEND は WEEKLY を上書きするが NOTICE は残す。
    pub fn overridable(&self) -> &'static [FeaturedFlag] {
        match self {
            FeaturedFlag::None => &[],
            FeaturedFlag::Weekly => &[FeaturedFlag::None],
            FeaturedFlag::Legend => &[FeaturedFlag::None, FeaturedFlag::Weekly],
            FeaturedFlag::Notice => &[
                FeaturedFlag::None,
                FeaturedFlag::Weekly,
                FeaturedFlag::Legend,
            ],
        }
    }

    pub fn can_override(&self, current: FeaturedFlag) -> bool {
        current == *self || self.overridable().contains(&current)
    }

    pub fn notification_message(&self) -> &'static str {
        match self {
            FeaturedFlag::Weekly => "Your post was selected as a weekly popular post.",
            FeaturedFlag::Legend => "Your post was selected as a legendary post.",
            FeaturedFlag::Notice => "Your post was pinned as a notice.",
            FeaturedFlag::None => "",
        }
    }
}

impl fmt::Display for FeaturedFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeaturedFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "" => Ok(FeaturedFlag::None),
            "WEEKLY" => Ok(FeaturedFlag::Weekly),
            "LEGEND" => Ok(FeaturedFlag::Legend),
            "NOTICE" => Ok(FeaturedFlag::Notice),
            other => Err(format!("unknown featured flag: {other}")),
        }
    }
}

/// 注目投稿に選ばれた作者への通知イベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedNotification {
    pub author_id: i64,
    pub post_id: i64,
    pub category: FeaturedFlag,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legend_overrides_weekly_but_not_notice() {
        assert!(FeaturedFlag::Legend.can_override(FeaturedFlag::Weekly));
        assert!(FeaturedFlag::Legend.can_override(FeaturedFlag::None));
        assert!(!FeaturedFlag::Legend.can_override(FeaturedFlag::Notice));
    }

    #[test]
    fn weekly_never_overrides_legend_or_notice() {
        assert!(FeaturedFlag::Weekly.can_override(FeaturedFlag::None));
        assert!(!FeaturedFlag::Weekly.can_override(FeaturedFlag::Legend));
        assert!(!FeaturedFlag::Weekly.can_override(FeaturedFlag::Notice));
    }

    #[test]
    fn parses_database_values() {
        assert_eq!("legend".parse::<FeaturedFlag>().unwrap(), FeaturedFlag::Legend);
        assert_eq!("".parse::<FeaturedFlag>().unwrap(), FeaturedFlag::None);
        assert!("HOT".parse::<FeaturedFlag>().is_err());
    }
}
