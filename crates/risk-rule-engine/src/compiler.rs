//! 规则编译器
//!
//! 校验规则结构并编译成内存中的执行树：把 `conditions`/`groups`
//! 两个列表归一化为按声明顺序排列的子节点，预编译正则表达式并
//! 缓存在条件节点上，同时预提取规则使用的全部字段路径。

use crate::error::{Result, RuleError};
use crate::models::{Condition, ConditionGroup, Rule, ValueType};
use crate::operators::{LogicalOperator, Operator};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// 规则树的最大嵌套深度，超过即拒绝（校验期与评估期同用）
pub const MAX_GROUP_DEPTH: usize = 64;

/// 单条校验问题
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    /// 规则树中的位置，如 "rule" 或 "group.groups[0].conditions[1]"
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// 编译后的条件节点，携带预编译的正则表达式
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub condition: Condition,
    /// REGEX / NOT_REGEX 操作符的预编译模式，编译一次反复使用
    pub regex: Option<Arc<Regex>>,
}

impl CompiledCondition {
    pub fn new(condition: Condition) -> Result<Self> {
        let regex = if condition.operator.uses_regex() {
            let pattern = condition.value.as_str().ok_or_else(|| {
                RuleError::CompileError(format!(
                    "条件 '{}' 的 {} 操作符需要字符串模式",
                    condition.field, condition.operator
                ))
            })?;
            let compiled = Regex::new(pattern).map_err(|e| {
                RuleError::CompileError(format!(
                    "条件 '{}' 的正则表达式无效: {}",
                    condition.field, e
                ))
            })?;
            Some(Arc::new(compiled))
        } else {
            None
        };

        Ok(Self { condition, regex })
    }
}

/// 编译后的规则节点
#[derive(Debug, Clone)]
pub enum CompiledNode {
    Condition(CompiledCondition),
    Group {
        operator: LogicalOperator,
        children: Vec<CompiledNode>,
    },
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    pub(crate) root: Option<CompiledNode>,
    /// 规则中使用的所有字段路径（含 REFERENCE 目标路径）
    pub required_fields: HashSet<String>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRule {
    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn is_enabled(&self) -> bool {
        self.rule.enabled
    }

    /// 编译后的评估根节点，规则无根时为 None（永不匹配）
    pub fn root(&self) -> Option<&CompiledNode> {
        self.root.as_ref()
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRule> {
        let rule: Rule = serde_json::from_str(json)?;
        self.compile(rule)
    }

    /// 编译规则
    ///
    /// 校验不通过时返回错误，所有问题拼接在错误信息中。
    pub fn compile(&mut self, rule: Rule) -> Result<CompiledRule> {
        let issues = self.validate(&rule);
        if !issues.is_empty() {
            let detail = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RuleError::CompileError(detail));
        }

        let root = match (&rule.condition, &rule.group) {
            (Some(cond), None) => Some(CompiledNode::Condition(CompiledCondition::new(
                cond.clone(),
            )?)),
            (None, Some(group)) => Some(Self::compile_group(group)?),
            // 校验已拒绝双根；无根规则保留为 None，评估时永不匹配
            _ => None,
        };

        let mut required_fields = HashSet::new();
        if let Some(node) = &root {
            Self::collect_fields(node, &mut required_fields);
        }

        self.compile_version += 1;

        Ok(CompiledRule {
            rule,
            root,
            required_fields,
            compile_version: self.compile_version,
        })
    }

    /// 校验规则结构，返回发现的全部问题（空列表表示通过）
    pub fn validate(&self, rule: &Rule) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if rule.id.is_empty() {
            issues.push(ValidationIssue::new("rule", "规则 ID 不能为空"));
        }
        if rule.name.is_empty() {
            issues.push(ValidationIssue::new("rule", "规则名称不能为空"));
        }

        match (&rule.condition, &rule.group) {
            (Some(_), Some(_)) => {
                issues.push(ValidationIssue::new(
                    "rule",
                    "评估根节点只能有一个（condition 或 group）",
                ));
            }
            (None, None) => {
                issues.push(ValidationIssue::new(
                    "rule",
                    "缺少评估根节点（condition 或 group）",
                ));
            }
            _ => {}
        }

        if let Some(cond) = &rule.condition {
            Self::validate_condition(cond, "condition", &mut issues);
        }
        if let Some(group) = &rule.group {
            Self::validate_group(group, "group", 1, &mut issues);
        }

        issues
    }

    fn validate_group(
        group: &ConditionGroup,
        path: &str,
        depth: usize,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if depth > MAX_GROUP_DEPTH {
            issues.push(ValidationIssue::new(
                path,
                format!("逻辑组嵌套超过最大深度 {}", MAX_GROUP_DEPTH),
            ));
            return;
        }

        if group.child_count() == 0 {
            issues.push(ValidationIssue::new(path, "逻辑组不能为空"));
        }

        for (i, cond) in group.conditions.iter().enumerate() {
            let child_path = format!("{}.conditions[{}]", path, i);
            Self::validate_condition(cond, &child_path, issues);
        }
        for (i, child) in group.groups.iter().enumerate() {
            let child_path = format!("{}.groups[{}]", path, i);
            Self::validate_group(child, &child_path, depth + 1, issues);
        }
    }

    fn validate_condition(cond: &Condition, path: &str, issues: &mut Vec<ValidationIssue>) {
        if cond.field.is_empty() {
            issues.push(ValidationIssue::new(path, "条件的字段路径不能为空"));
        }

        // REFERENCE 的 value 是字段路径而非字面操作数，只校验路径本身
        if matches!(cond.value_type, Some(ValueType::Reference)) {
            match cond.value.as_str() {
                Some(target) if !target.is_empty() => {}
                _ => {
                    issues.push(ValidationIssue::new(
                        path,
                        "REFERENCE 条件的 value 必须是非空字段路径",
                    ));
                }
            }
            if cond.operator.uses_regex() {
                issues.push(ValidationIssue::new(
                    path,
                    "REGEX 操作符不支持 REFERENCE 取值",
                ));
            }
            return;
        }

        Self::validate_operator_value(cond, path, issues);
        Self::validate_declared_type(cond, path, issues);
    }

    /// 校验操作符和值的兼容性
    fn validate_operator_value(cond: &Condition, path: &str, issues: &mut Vec<ValidationIssue>) {
        match cond.operator {
            Operator::Between => match &cond.value {
                Value::Array(arr) if arr.len() == 2 => {
                    if arr.iter().any(|v| coercible_f64(v).is_none()) {
                        issues.push(ValidationIssue::new(
                            path,
                            "BETWEEN 操作符的 [min, max] 必须是数值",
                        ));
                    }
                }
                _ => {
                    issues.push(ValidationIssue::new(
                        path,
                        "BETWEEN 操作符需要 [min, max] 数组",
                    ));
                }
            },
            op if op.requires_array_value() => {
                if !cond.value.is_array() {
                    issues.push(ValidationIssue::new(
                        path,
                        format!("{} 操作符需要数组值", cond.operator),
                    ));
                }
            }
            op if op.uses_regex() => match cond.value.as_str() {
                Some(pattern) => {
                    if let Err(e) = Regex::new(pattern) {
                        issues.push(ValidationIssue::new(
                            path,
                            format!("正则表达式无效: {}", e),
                        ));
                    }
                }
                None => {
                    issues.push(ValidationIssue::new(
                        path,
                        format!("{} 操作符需要字符串模式", cond.operator),
                    ));
                }
            },
            Operator::GeoDistance => {
                let ok = cond.value.as_object().is_some_and(|obj| {
                    ["lat", "lon", "radius_km"]
                        .iter()
                        .all(|k| obj.get(*k).is_some_and(|v| coercible_f64(v).is_some()))
                });
                if !ok {
                    issues.push(ValidationIssue::new(
                        path,
                        "GEO_DISTANCE 操作符需要 {lat, lon, radius_km} 对象",
                    ));
                }
            }
            Operator::TimeRange => {
                let bounds = cond.value.as_object().map(|obj| {
                    (
                        obj.get("start").and_then(parse_timestamp),
                        obj.get("end").and_then(parse_timestamp),
                    )
                });
                match bounds {
                    Some((Some(start), Some(end))) => {
                        if start > end {
                            issues.push(ValidationIssue::new(
                                path,
                                "TIME_RANGE 的 start 不能晚于 end",
                            ));
                        }
                    }
                    _ => {
                        issues.push(ValidationIssue::new(
                            path,
                            "TIME_RANGE 操作符需要 {start, end} 时间戳对象",
                        ));
                    }
                }
            }
            Operator::TimeAfter | Operator::TimeBefore => {
                if parse_timestamp(&cond.value).is_none() {
                    issues.push(ValidationIssue::new(
                        path,
                        format!("{} 操作符需要可解析的时间戳", cond.operator),
                    ));
                }
            }
            Operator::Exists | Operator::NotExists => {
                // 存在性检查不需要值
            }
            _ => {}
        }
    }

    /// 声明的 value_type 必须与字面值一致
    fn validate_declared_type(cond: &Condition, path: &str, issues: &mut Vec<ValidationIssue>) {
        let Some(value_type) = cond.value_type else {
            return;
        };

        let ok = match value_type {
            ValueType::String => cond.value.is_string(),
            // NUMBER 允许数值字符串，评估时归一化为数字
            ValueType::Number => coercible_f64(&cond.value).is_some(),
            ValueType::Boolean => cond.value.is_boolean(),
            ValueType::Array => cond.value.is_array(),
            ValueType::Object => cond.value.is_object(),
            ValueType::Null => cond.value.is_null(),
            ValueType::Regex => cond.value.is_string(),
            ValueType::Reference => unreachable!("REFERENCE 已在上游单独处理"),
        };

        if !ok {
            issues.push(ValidationIssue::new(
                path,
                format!("声明的 value_type 为 {:?}，与字面值不一致", value_type),
            ));
        }
    }

    fn compile_group(group: &ConditionGroup) -> Result<CompiledNode> {
        let mut children = Vec::with_capacity(group.child_count());
        for cond in &group.conditions {
            children.push(CompiledNode::Condition(CompiledCondition::new(
                cond.clone(),
            )?));
        }
        for child in &group.groups {
            children.push(Self::compile_group(child)?);
        }

        Ok(CompiledNode::Group {
            operator: group.operator,
            children,
        })
    }

    /// 递归收集字段路径
    fn collect_fields(node: &CompiledNode, fields: &mut HashSet<String>) {
        match node {
            CompiledNode::Condition(cc) => {
                fields.insert(cc.condition.field.clone());
                if matches!(cc.condition.value_type, Some(ValueType::Reference)) {
                    if let Some(target) = cc.condition.value.as_str() {
                        fields.insert(target.to_string());
                    }
                }
            }
            CompiledNode::Group { children, .. } => {
                for child in children {
                    Self::collect_fields(child, fields);
                }
            }
        }
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// 数值或数值字符串
fn coercible_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// RFC 3339 或 %Y-%m-%d 时间戳
fn parse_timestamp(value: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = value.as_str()?;
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
