//! 规则操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    // 通用比较
    Equals,
    NotEquals,

    // 数值比较
    Gt,
    Gte,
    Lt,
    Lte,
    Between,

    // 集合检查
    In,
    NotIn,
    Contains,
    NotContains,
    ContainsAny,
    ContainsAll,

    // 字符串操作
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Regex,
    NotRegex,

    // 存在性检查
    Exists,
    NotExists,

    // 地理位置
    GeoDistance,

    // 时间操作
    TimeRange,
    TimeAfter,
    TimeBefore,
}

impl Operator {
    /// 该操作符的期望值是否必须为数组
    pub fn requires_array_value(self) -> bool {
        matches!(
            self,
            Self::In | Self::NotIn | Self::ContainsAny | Self::ContainsAll | Self::Between
        )
    }

    /// 该操作符是否使用预编译的正则表达式
    pub fn uses_regex(self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }

    /// 该操作符是否为存在性检查（字段缺失不算失败）
    pub fn is_existence(self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::Between => "BETWEEN",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::ContainsAny => "CONTAINS_ANY",
            Self::ContainsAll => "CONTAINS_ALL",
            Self::StartsWith => "STARTS_WITH",
            Self::NotStartsWith => "NOT_STARTS_WITH",
            Self::EndsWith => "ENDS_WITH",
            Self::NotEndsWith => "NOT_ENDS_WITH",
            Self::Regex => "REGEX",
            Self::NotRegex => "NOT_REGEX",
            Self::Exists => "EXISTS",
            Self::NotExists => "NOT_EXISTS",
            Self::GeoDistance => "GEO_DISTANCE",
            Self::TimeRange => "TIME_RANGE",
            Self::TimeAfter => "TIME_AFTER",
            Self::TimeBefore => "TIME_BEFORE",
        };
        write!(f, "{}", s)
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
        }
    }
}
