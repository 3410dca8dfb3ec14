//! 枚举类型定义
//!
//! 测序状态同时支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 条码测序状态
///
/// 由实验室流程驱动，这里只做记录。初始为 `Waiting`，
/// 之后只能单调地进入某一个终态（成功或某类失败）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum SequencingStatus {
    /// 等待测序
    #[default]
    #[serde(rename = "WAITING")]
    #[sqlx(rename = "WAITING")]
    Waiting,
    #[serde(rename = "SUCCESS")]
    #[sqlx(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED_SEQUENCING")]
    #[sqlx(rename = "FAILED_SEQUENCING")]
    FailedSequencing,
    #[serde(rename = "FAILED_SEQUENCING_1")]
    #[sqlx(rename = "FAILED_SEQUENCING_1")]
    FailedSequencing1,
    #[serde(rename = "FAILED_SEQUENCING_2")]
    #[sqlx(rename = "FAILED_SEQUENCING_2")]
    FailedSequencing2,
    #[serde(rename = "FAILED_SEQUENCING_3")]
    #[sqlx(rename = "FAILED_SEQUENCING_3")]
    FailedSequencing3,
}

impl SequencingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Success => "SUCCESS",
            Self::FailedSequencing => "FAILED_SEQUENCING",
            Self::FailedSequencing1 => "FAILED_SEQUENCING_1",
            Self::FailedSequencing2 => "FAILED_SEQUENCING_2",
            Self::FailedSequencing3 => "FAILED_SEQUENCING_3",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting)
    }

    /// 状态迁移是否合法
    ///
    /// `Waiting` 可以保持或进入任一终态；终态只能重复写入自身
    pub fn can_transition_to(&self, next: SequencingStatus) -> bool {
        match self {
            Self::Waiting => true,
            current => *current == next,
        }
    }
}

impl std::fmt::Display for SequencingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 登录的地理编码状态
///
/// 由坐标字段和 `cannot_geocode` 推导，不单独落库
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocodeState {
    /// 尚未处理
    Pending,
    /// 经纬度与海拔均已补全
    Resolved,
    /// 永久失败，只有显式的重试扫描才会重新处理
    Unresolvable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequencing_status_serde() {
        let json = serde_json::to_string(&SequencingStatus::FailedSequencing2).unwrap();
        assert_eq!(json, "\"FAILED_SEQUENCING_2\"");

        let parsed: SequencingStatus = serde_json::from_str("\"WAITING\"").unwrap();
        assert_eq!(parsed, SequencingStatus::Waiting);
    }

    #[test]
    fn test_sequencing_transitions() {
        use SequencingStatus::*;

        assert!(Waiting.can_transition_to(Waiting));
        for terminal in [
            Success,
            FailedSequencing,
            FailedSequencing1,
            FailedSequencing2,
            FailedSequencing3,
        ] {
            assert!(terminal.is_terminal());
            assert!(Waiting.can_transition_to(terminal));
            assert!(terminal.can_transition_to(terminal));
            assert!(!terminal.can_transition_to(Waiting));
        }
        assert!(!Success.can_transition_to(FailedSequencing));
        assert!(!FailedSequencing1.can_transition_to(FailedSequencing2));
    }

    #[test]
    fn test_as_str_matches_display() {
        assert_eq!(SequencingStatus::Success.to_string(), "SUCCESS");
        assert_eq!(SequencingStatus::default().as_str(), "WAITING");
    }
}
