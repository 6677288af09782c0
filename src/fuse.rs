use serde::Serialize;

pub const TREASURE_ICON: &str = "icons/treasure-chest.png";

/// Discrete progress level shown on a download's notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub enum FuseBucket {
    #[default]
    Unlit,
    Quarter,
    Half,
    ThreeQuarters,
    Burnt,
}

impl FuseBucket {
    pub fn from_percent(percent: u32) -> Self {
        match percent {
            p if p >= 100 => FuseBucket::Burnt,
            p if p >= 75 => FuseBucket::ThreeQuarters,
            p if p >= 50 => FuseBucket::Half,
            p if p >= 25 => FuseBucket::Quarter,
            _ => FuseBucket::Unlit,
        }
    }

    pub fn value(self) -> u8 {
        match self {
            FuseBucket::Unlit => 0,
            FuseBucket::Quarter => 25,
            FuseBucket::Half => 50,
            FuseBucket::ThreeQuarters => 75,
            FuseBucket::Burnt => 100,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            FuseBucket::Unlit => "icons/fuse-0.png",
            FuseBucket::Quarter => "icons/fuse-25.png",
            FuseBucket::Half => "icons/fuse-50.png",
            FuseBucket::ThreeQuarters => "icons/fuse-75.png",
            FuseBucket::Burnt => "icons/fuse-100.png",
        }
    }
}

impl From<FuseBucket> for u8 {
    fn from(bucket: FuseBucket) -> u8 {
        bucket.value()
    }
}

/// Rounded completion percentage, or `None` while the total size is unknown.
/// Hosts report an unknown size as `0` or `-1`.
pub fn progress_percent(bytes_received: u64, total_bytes: i64) -> Option<u32> {
    if total_bytes <= 0 {
        return None;
    }
    let percent = (bytes_received as f64 / total_bytes as f64 * 100.0).round();
    Some(percent.min(u32::MAX as f64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_thresholds() {
        assert_eq!(FuseBucket::from_percent(0), FuseBucket::Unlit);
        assert_eq!(FuseBucket::from_percent(24), FuseBucket::Unlit);
        assert_eq!(FuseBucket::from_percent(25), FuseBucket::Quarter);
        assert_eq!(FuseBucket::from_percent(37), FuseBucket::Quarter);
        assert_eq!(FuseBucket::from_percent(50), FuseBucket::Half);
        assert_eq!(FuseBucket::from_percent(74), FuseBucket::Half);
        assert_eq!(FuseBucket::from_percent(75), FuseBucket::ThreeQuarters);
        assert_eq!(FuseBucket::from_percent(99), FuseBucket::ThreeQuarters);
        assert_eq!(FuseBucket::from_percent(100), FuseBucket::Burnt);
        assert_eq!(FuseBucket::from_percent(250), FuseBucket::Burnt);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(37, 100), Some(37));
        assert_eq!(progress_percent(50, 200), Some(25));
        // 24.5% rounds up into the next bucket
        assert_eq!(progress_percent(49, 200), Some(25));
        assert_eq!(progress_percent(300, 200), Some(150));
        assert_eq!(progress_percent(0, 0), None);
        assert_eq!(progress_percent(10, -1), None);
    }

    #[test]
    fn test_icons_and_serialization() {
        assert_eq!(FuseBucket::Unlit.icon(), "icons/fuse-0.png");
        assert_eq!(FuseBucket::Burnt.icon(), "icons/fuse-100.png");
        assert_eq!(
            serde_json::to_value(FuseBucket::ThreeQuarters).unwrap(),
            serde_json::json!(75)
        );
    }
}
