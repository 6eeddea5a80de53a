//! 条件评估器
//!
//! 实现各操作符在两个操作数上的评估逻辑与类型强制转换规则。
//! 类型不兼容等运行期故障以 `Err` 返回，由执行器按失败关闭
//! 处理并记入诊断，不会向外抛出。

use crate::error::{Result, RuleError};
use crate::models::{Condition, ValueType};
use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

/// 地球平均半径（公里），哈弗辛公式使用
const EARTH_RADIUS_KM: f64 = 6371.0;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件
    ///
    /// # Arguments
    /// * `field_value` - 从事件中解析出的字段值，路径不可达时为 None
    /// * `condition` - 条件定义，取其操作符与 value_type
    /// * `expected` - 期望值；REFERENCE 条件由调用方先行解引用
    /// * `regex` - 预编译的正则模式，仅 REGEX/NOT_REGEX 使用
    pub fn evaluate(
        field_value: Option<&Value>,
        condition: &Condition,
        expected: &Value,
        regex: Option<&Regex>,
    ) -> Result<bool> {
        // 存在性检查的语义就是回答字段是否存在，先于缺失兜底处理
        match condition.operator {
            Operator::Exists => return Ok(Self::resolves(field_value)),
            Operator::NotExists => return Ok(!Self::resolves(field_value)),
            _ => {}
        }

        // 其余操作符遇到缺失字段一律视为不匹配
        let Some(field_value) = field_value else {
            return Ok(false);
        };

        // 声明 NUMBER 时数值字符串归一化为数字参与相等比较
        let numeric = matches!(condition.value_type, Some(ValueType::Number));

        match condition.operator {
            Operator::Equals => Ok(Self::eq(field_value, expected, numeric)),
            Operator::NotEquals => Ok(!Self::eq(field_value, expected, numeric)),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                Self::compare(field_value, expected, condition.operator)
            }
            Operator::Between => Self::between(field_value, expected),
            Operator::In => Self::in_list(field_value, expected, numeric),
            Operator::NotIn => Self::in_list(field_value, expected, numeric).map(|r| !r),
            Operator::Contains => Self::contains(field_value, expected, numeric),
            Operator::NotContains => Self::contains(field_value, expected, numeric).map(|r| !r),
            Operator::ContainsAny => Self::contains_any(field_value, expected, numeric),
            Operator::ContainsAll => Self::contains_all(field_value, expected, numeric),
            Operator::StartsWith => Self::starts_with(field_value, expected),
            Operator::NotStartsWith => Self::starts_with(field_value, expected).map(|r| !r),
            Operator::EndsWith => Self::ends_with(field_value, expected),
            Operator::NotEndsWith => Self::ends_with(field_value, expected).map(|r| !r),
            Operator::Regex => Self::regex_match(field_value, regex),
            Operator::NotRegex => Self::regex_match(field_value, regex).map(|r| !r),
            Operator::GeoDistance => Self::geo_distance(field_value, expected),
            Operator::TimeRange => Self::time_range(field_value, expected),
            Operator::TimeAfter => Self::time_compare(field_value, expected, |a, b| a > b),
            Operator::TimeBefore => Self::time_compare(field_value, expected, |a, b| a < b),
            Operator::Exists | Operator::NotExists => unreachable!(),
        }
    }

    /// 字段路径是否解析出了有效值（显式 null 视为不存在）
    fn resolves(field_value: Option<&Value>) -> bool {
        field_value.is_some_and(|v| !v.is_null())
    }

    /// 相等比较
    ///
    /// 数值统一转为 f64 比较，避免整数与浮点不等（如 100 != 100.0）。
    /// 类别不同的值不做跨类强制转换，直接判为不相等。
    fn eq(field: &Value, expected: &Value, numeric: bool) -> bool {
        if numeric {
            return match (Self::as_f64(field), Self::as_f64(expected)) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            };
        }

        match (field, expected) {
            (Value::Number(_), Value::Number(_)) => {
                match (field.as_f64(), expected.as_f64()) {
                    (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                    _ => field == expected,
                }
            }
            _ => field == expected,
        }
    }

    /// 大小比较：两侧同时转为数值，否则同时解析为时间戳
    fn compare(field: &Value, expected: &Value, op: Operator) -> Result<bool> {
        if let (Some(a), Some(b)) = (Self::as_f64(field), Self::as_f64(expected)) {
            let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            return Ok(Self::ordering_matches(op, ord));
        }

        if let (Ok(a), Ok(b)) = (Self::parse_datetime(field), Self::parse_datetime(expected)) {
            return Ok(Self::ordering_matches(op, a.cmp(&b)));
        }

        Err(RuleError::TypeMismatch {
            expected: "number 或时间戳".to_string(),
            actual: format!(
                "{} / {}",
                Self::type_name(field),
                Self::type_name(expected)
            ),
        })
    }

    fn ordering_matches(op: Operator, ord: Ordering) -> bool {
        match op {
            Operator::Gt => ord == Ordering::Greater,
            Operator::Gte => ord != Ordering::Less,
            Operator::Lt => ord == Ordering::Less,
            Operator::Lte => ord != Ordering::Greater,
            _ => unreachable!("非比较操作符"),
        }
    }

    /// 范围比较，expected 为 [min, max]，闭区间
    fn between(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array [min, max]", expected))?;

        if arr.len() != 2 {
            return Err(RuleError::ExecutionError(
                "BETWEEN 操作符需要 [min, max] 数组".to_string(),
            ));
        }

        let v = Self::as_f64(field).ok_or_else(|| Self::type_mismatch("number", field))?;
        let min = Self::as_f64(&arr[0]).ok_or_else(|| Self::type_mismatch("number", &arr[0]))?;
        let max = Self::as_f64(&arr[1]).ok_or_else(|| Self::type_mismatch("number", &arr[1]))?;

        Ok(v >= min && v <= max)
    }

    /// 列表成员检查，成员相等复用 EQUALS 规则
    fn in_list(field: &Value, expected: &Value, numeric: bool) -> Result<bool> {
        let arr = expected
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array", expected))?;

        Ok(arr.iter().any(|item| Self::eq(field, item, numeric)))
    }

    /// 字符串子串或数组成员检查
    fn contains(field: &Value, expected: &Value, numeric: bool) -> Result<bool> {
        match field {
            Value::String(s) => {
                let needle = Self::as_text(expected)?;
                Ok(s.contains(needle.as_ref()))
            }
            Value::Array(arr) => Ok(arr.iter().any(|item| Self::eq(item, expected, numeric))),
            _ => Err(Self::type_mismatch("string 或 array", field)),
        }
    }

    /// 数组与期望数组存在交集
    fn contains_any(field: &Value, expected: &Value, numeric: bool) -> Result<bool> {
        let field_arr = field
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array", field))?;
        let expected_arr = expected
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array", expected))?;

        Ok(expected_arr
            .iter()
            .any(|e| field_arr.iter().any(|f| Self::eq(f, e, numeric))))
    }

    /// 期望数组是字段数组的子集
    fn contains_all(field: &Value, expected: &Value, numeric: bool) -> Result<bool> {
        let field_arr = field
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array", field))?;
        let expected_arr = expected
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array", expected))?;

        Ok(expected_arr
            .iter()
            .all(|e| field_arr.iter().any(|f| Self::eq(f, e, numeric))))
    }

    fn starts_with(field: &Value, expected: &Value) -> Result<bool> {
        let s = Self::as_text(field)?;
        let prefix = Self::as_text(expected)?;
        Ok(s.starts_with(prefix.as_ref()))
    }

    fn ends_with(field: &Value, expected: &Value) -> Result<bool> {
        let s = Self::as_text(field)?;
        let suffix = Self::as_text(expected)?;
        Ok(s.ends_with(suffix.as_ref()))
    }

    /// 正则匹配，模式在规则编译期预编译
    fn regex_match(field: &Value, regex: Option<&Regex>) -> Result<bool> {
        let s = Self::as_text(field)?;
        let re = regex.ok_or_else(|| {
            RuleError::ExecutionError("正则表达式未预编译，规则未经编译器加载".to_string())
        })?;
        Ok(re.is_match(s.as_ref()))
    }

    /// 地理距离检查：字段为 {lat, lon}，期望值为 {lat, lon, radius_km}
    fn geo_distance(field: &Value, expected: &Value) -> Result<bool> {
        let (lat, lon) = Self::geo_point(field)?;
        let center = expected
            .as_object()
            .ok_or_else(|| Self::type_mismatch("{lat, lon, radius_km} 对象", expected))?;

        let center_lat = Self::obj_f64(center, "lat")?;
        let center_lon = Self::obj_f64(center, "lon")?;
        let radius_km = Self::obj_f64(center, "radius_km")?;

        let distance = Self::haversine_km(lat, lon, center_lat, center_lon);
        Ok(distance <= radius_km)
    }

    fn geo_point(value: &Value) -> Result<(f64, f64)> {
        let obj = value
            .as_object()
            .ok_or_else(|| Self::type_mismatch("{lat, lon} 对象", value))?;
        Ok((Self::obj_f64(obj, "lat")?, Self::obj_f64(obj, "lon")?))
    }

    fn obj_f64(obj: &Map<String, Value>, key: &str) -> Result<f64> {
        obj.get(key)
            .and_then(Self::as_f64)
            .ok_or_else(|| RuleError::TypeMismatch {
                expected: format!("数值字段 {}", key),
                actual: obj
                    .get(key)
                    .map(|v| Self::type_name(v).to_string())
                    .unwrap_or_else(|| "缺失".to_string()),
            })
    }

    /// 哈弗辛公式计算两点间大圆距离（公里）
    fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let d_lat = (lat2 - lat1).to_radians();
        let d_lon = (lon2 - lon1).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

        EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
    }

    /// 时间区间检查，expected 为 {start, end}，闭区间
    fn time_range(field: &Value, expected: &Value) -> Result<bool> {
        let t = Self::parse_datetime(field)?;
        let obj = expected
            .as_object()
            .ok_or_else(|| Self::type_mismatch("{start, end} 对象", expected))?;

        let start = obj
            .get("start")
            .ok_or_else(|| RuleError::ExecutionError("TIME_RANGE 缺少 start".to_string()))?;
        let end = obj
            .get("end")
            .ok_or_else(|| RuleError::ExecutionError("TIME_RANGE 缺少 end".to_string()))?;

        let start = Self::parse_datetime(start)?;
        let end = Self::parse_datetime(end)?;

        Ok(t >= start && t <= end)
    }

    /// 时间比较
    fn time_compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    {
        let field_time = Self::parse_datetime(field)?;
        let expected_time = Self::parse_datetime(expected)?;

        Ok(cmp(field_time, expected_time))
    }

    /// 解析日期时间：RFC 3339，或纯日期按当天零点
    fn parse_datetime(value: &Value) -> Result<DateTime<Utc>> {
        let s = value
            .as_str()
            .ok_or_else(|| Self::type_mismatch("datetime string", value))?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt.and_utc());
            }
        }

        Err(RuleError::ExecutionError(format!(
            "无法解析日期时间: '{}'",
            s
        )))
    }

    /// 尝试将 Value 转换为 f64（数值或数值字符串）
    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// 标量的字符串形式，数组与对象不参与字符串操作
    fn as_text(value: &Value) -> Result<Cow<'_, str>> {
        match value {
            Value::String(s) => Ok(Cow::Borrowed(s)),
            Value::Number(n) => Ok(Cow::Owned(n.to_string())),
            Value::Bool(b) => Ok(Cow::Owned(b.to_string())),
            other => Err(Self::type_mismatch("string", other)),
        }
    }

    fn type_mismatch(expected: &str, actual: &Value) -> RuleError {
        RuleError::TypeMismatch {
            expected: expected.to_string(),
            actual: Self::type_name(actual).to_string(),
        }
    }

    /// 获取值的类型名称
    fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
