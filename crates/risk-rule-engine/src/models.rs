//! 规则引擎领域模型

use crate::operators::{LogicalOperator, Operator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 条件期望值的声明类型
///
/// 可选的类型提示，影响评估时的取值与强制转换：
/// `NUMBER` 允许把数值字符串当作数字比较，`REFERENCE` 表示
/// `value` 本身是一条字段路径，评估时先到事件中解引用再比较。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
    Regex,
    Reference,
}

/// 规则严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// 规则匹配后触发的动作
///
/// 引擎只负责把动作原样带回评估结果，具体派发由上层完成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Block,
    Alert,
    Notify,
    Flag,
    Review,
    Log,
}

/// 条件节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            id: None,
            field: field.into(),
            operator,
            value: value.into(),
            value_type: None,
            description: None,
        }
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }
}

/// 逻辑组节点
///
/// 子节点的声明顺序为：先 `conditions`（按声明序），再 `groups`（按声明序）。
/// 评估与审计记录均遵循该顺序。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConditionGroup {
    pub fn new(operator: LogicalOperator, conditions: Vec<Condition>) -> Self {
        Self {
            id: None,
            operator,
            conditions,
            groups: Vec::new(),
            description: None,
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::new(LogicalOperator::And, conditions)
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::new(LogicalOperator::Or, conditions)
    }

    pub fn not(conditions: Vec<Condition>) -> Self {
        Self::new(LogicalOperator::Not, conditions)
    }

    pub fn with_groups(mut self, groups: Vec<ConditionGroup>) -> Self {
        self.groups = groups;
        self
    }

    /// 直接子节点数量（条件 + 子组）
    pub fn child_count(&self) -> usize {
        self.conditions.len() + self.groups.len()
    }
}

/// 规则定义
///
/// 评估根节点是 `condition` 与 `group` 中的一个；两者都缺失时规则永不匹配。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<ConditionGroup>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_config: Option<Value>,
    #[serde(default)]
    pub score: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            severity: Severity::default(),
            category: String::new(),
            region: None,
            tags: Vec::new(),
            version: Some("1.0".to_string()),
            condition: None,
            group: None,
            actions: Vec::new(),
            action_config: None,
            score: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_group(mut self, group: ConditionGroup) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 规则集
///
/// 有序的规则 ID 引用列表，不拥有规则本身。引用可能悬空
/// （规则被外部删除），批量评估时跳过并告警，不会崩溃。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, rules: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            rules,
            region: None,
            tags: Vec::new(),
        }
    }
}

/// 评估上下文 - 提供给规则引擎的事件数据
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    data: Value,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 从 JSON 字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self { data })
    }

    /// 获取字段值
    ///
    /// 支持点号路径与数组下标，如 "event.type"、"items.0.name"、"items[0].name"。
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;

        for part in path.split('.') {
            for seg in part.split('[') {
                let seg = seg.trim_end_matches(']');
                if seg.is_empty() {
                    continue;
                }
                match current {
                    Value::Object(map) => {
                        current = map.get(seg)?;
                    }
                    Value::Array(arr) => {
                        let index: usize = seg.parse().ok()?;
                        current = arr.get(index)?;
                    }
                    _ => return None,
                }
            }
        }

        Some(current)
    }

    /// 事件根节点是否为 JSON 对象
    pub fn has_object_root(&self) -> bool {
        self.data.is_object()
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// 评估过程中解析到的字段及其值，按检查顺序记录，用于审计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedField {
    pub field: String,
    pub value: Value,
}

/// 单个条件的评估故障
///
/// 故障按失败关闭处理（条件记为不匹配），记录在结果的诊断通道中，
/// 不会中断同组其他条件或同批次其他规则。
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationDiagnostic {
    /// 规则树中的位置，如 "root.children[1]"
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

/// 评估结果
#[derive(Debug, Clone, Serialize)]
pub struct RuleEvaluationResult {
    pub rule_id: String,
    pub rule_name: String,
    pub matched: bool,
    pub score: f64,
    pub severity: Severity,
    /// 匹配时为规则声明的动作列表，未匹配时为空
    pub actions: Vec<Action>,
    pub matched_fields: Vec<MatchedField>,
    pub diagnostics: Vec<EvaluationDiagnostic>,
    pub evaluation_trace: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub evaluation_time_us: u64,
}

impl RuleEvaluationResult {
    pub fn new(rule: &Rule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            matched: false,
            score: 0.0,
            severity: rule.severity,
            actions: Vec::new(),
            matched_fields: Vec::new(),
            diagnostics: Vec::new(),
            evaluation_trace: Vec::new(),
            timestamp: Utc::now(),
            evaluation_time_us: 0,
        }
    }
}

/// 规则集评估时被跳过的规则及原因
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRule {
    pub rule_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// 规则集引用了不存在的规则
    NotFound,
    /// 规则被禁用
    Disabled,
}

/// 规则集评估汇总
#[derive(Debug, Clone, Serialize)]
pub struct SetEvaluation {
    pub set_id: String,
    pub set_name: String,
    /// 仅包含匹配的规则结果，按规则集声明顺序排列
    pub results: Vec<RuleEvaluationResult>,
    pub skipped: Vec<SkippedRule>,
    /// 匹配规则分值之和
    pub total_score: f64,
}
