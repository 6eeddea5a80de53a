//! 规则执行器
//!
//! 对编译后的规则树做递归短路求值：子节点按声明顺序评估，
//! 解析过的字段按检查顺序记入审计通道。单个条件的评估故障
//! 按失败关闭处理（记为不匹配并写入诊断），不会中断兄弟节点。

use crate::compiler::{CompiledCondition, CompiledNode, CompiledRule, MAX_GROUP_DEPTH};
use crate::evaluator::ConditionEvaluator;
use crate::models::{
    EvaluationContext, EvaluationDiagnostic, MatchedField, RuleEvaluationResult, ValueType,
};
use crate::operators::LogicalOperator;
use std::time::Instant;

/// 评估策略
///
/// 空组的真值与递归深度上限都是策略项而非硬编码：
/// 空 AND 按惯例为真（vacuous truth），空 OR 为假，空 NOT 为真。
#[derive(Debug, Clone)]
pub struct EvaluationPolicy {
    pub empty_and: bool,
    pub empty_or: bool,
    pub empty_not: bool,
    /// 评估期递归深度上限，超出按评估故障处理
    pub max_depth: usize,
    /// 是否记录详细评估追踪
    pub trace: bool,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            empty_and: true,
            empty_or: false,
            empty_not: true,
            max_depth: MAX_GROUP_DEPTH,
            trace: false,
        }
    }
}

/// 规则执行器
pub struct RuleExecutor {
    policy: EvaluationPolicy,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            policy: EvaluationPolicy::default(),
        }
    }

    pub fn with_policy(policy: EvaluationPolicy) -> Self {
        Self { policy }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.policy.trace = true;
        self
    }

    pub fn policy(&self) -> &EvaluationPolicy {
        &self.policy
    }

    /// 执行规则评估
    ///
    /// 评估故障不会让本调用失败：故障条件记为不匹配并写入结果的
    /// 诊断通道。匹配时结果携带规则声明的分值与动作。
    pub fn execute(&self, rule: &CompiledRule, context: &EvaluationContext) -> RuleEvaluationResult {
        let start = Instant::now();
        let mut result = RuleEvaluationResult::new(&rule.rule);

        let matched = match rule.root() {
            Some(root) => self.evaluate_node(root, context, &mut result, "root", 0),
            None => {
                // 无评估根的规则永不匹配
                if self.policy.trace {
                    result
                        .evaluation_trace
                        .push("root: 规则缺少评估根节点，按不匹配处理".to_string());
                }
                false
            }
        };

        result.matched = matched;
        if matched {
            result.score = rule.rule.score;
            result.actions = rule.rule.actions.clone();
        }
        result.evaluation_time_us = start.elapsed().as_micros() as u64;

        result
    }

    /// 递归评估规则节点
    fn evaluate_node(
        &self,
        node: &CompiledNode,
        context: &EvaluationContext,
        result: &mut RuleEvaluationResult,
        path: &str,
        depth: usize,
    ) -> bool {
        if depth > self.policy.max_depth {
            result.diagnostics.push(EvaluationDiagnostic {
                path: path.to_string(),
                field: None,
                message: format!("递归深度超过上限 {}，该分支按不匹配处理", self.policy.max_depth),
            });
            return false;
        }

        match node {
            CompiledNode::Condition(cc) => self.evaluate_condition(cc, context, result, path),
            CompiledNode::Group { operator, children } => {
                self.evaluate_group(*operator, children, context, result, path, depth)
            }
        }
    }

    /// 评估条件节点
    fn evaluate_condition(
        &self,
        cc: &CompiledCondition,
        context: &EvaluationContext,
        result: &mut RuleEvaluationResult,
        path: &str,
    ) -> bool {
        let cond = &cc.condition;
        let field_value = context.get_field(&cond.field);

        // 审计通道：按检查顺序记录解析到的字段，同一字段只记首次
        if let Some(v) = field_value {
            if !result.matched_fields.iter().any(|m| m.field == cond.field) {
                result.matched_fields.push(MatchedField {
                    field: cond.field.clone(),
                    value: v.clone(),
                });
            }
        }

        // REFERENCE：期望值是字段路径，先到事件中解引用
        let expected = if matches!(cond.value_type, Some(ValueType::Reference)) {
            let Some(target) = cond.value.as_str() else {
                self.record_fault(result, path, cond.field.clone(), "REFERENCE 条件的 value 必须是字段路径");
                return false;
            };
            match context.get_field(target) {
                Some(v) => v,
                None => {
                    self.record_fault(
                        result,
                        path,
                        cond.field.clone(),
                        format!("引用路径 '{}' 无法解析", target),
                    );
                    return false;
                }
            }
        } else {
            &cond.value
        };

        match ConditionEvaluator::evaluate(field_value, cond, expected, cc.regex.as_deref()) {
            Ok(matched) => {
                if self.policy.trace {
                    result.evaluation_trace.push(format!(
                        "{}: {} {} {} => {}",
                        path,
                        cond.field,
                        cond.operator,
                        cond.value,
                        if matched { "MATCHED" } else { "NOT_MATCHED" }
                    ));
                }
                matched
            }
            Err(e) => {
                self.record_fault(result, path, cond.field.clone(), e.to_string());
                false
            }
        }
    }

    /// 评估逻辑组节点（短路求值）
    fn evaluate_group(
        &self,
        operator: LogicalOperator,
        children: &[CompiledNode],
        context: &EvaluationContext,
        result: &mut RuleEvaluationResult,
        path: &str,
        depth: usize,
    ) -> bool {
        if self.policy.trace {
            result.evaluation_trace.push(format!(
                "{}: 开始评估 {} 组 (共 {} 个子节点)",
                path,
                operator,
                children.len()
            ));
        }

        if children.is_empty() {
            let value = match operator {
                LogicalOperator::And => self.policy.empty_and,
                LogicalOperator::Or => self.policy.empty_or,
                LogicalOperator::Not => self.policy.empty_not,
            };
            if self.policy.trace {
                result
                    .evaluation_trace
                    .push(format!("{}: 空 {} 组，按策略取 {}", path, operator, value));
            }
            return value;
        }

        match operator {
            LogicalOperator::And => {
                // AND: 所有子节点都必须满足，遇到 false 立即返回
                for (i, child) in children.iter().enumerate() {
                    let child_path = format!("{}.children[{}]", path, i);
                    if !self.evaluate_node(child, context, result, &child_path, depth + 1) {
                        if self.policy.trace {
                            result
                                .evaluation_trace
                                .push(format!("{}: AND 短路 - 子节点 {} 不匹配", path, i));
                        }
                        return false;
                    }
                }
                true
            }
            LogicalOperator::Or => {
                // OR: 任一子节点满足即可，遇到 true 立即返回
                for (i, child) in children.iter().enumerate() {
                    let child_path = format!("{}.children[{}]", path, i);
                    if self.evaluate_node(child, context, result, &child_path, depth + 1) {
                        if self.policy.trace {
                            result
                                .evaluation_trace
                                .push(format!("{}: OR 短路 - 子节点 {} 匹配", path, i));
                        }
                        return true;
                    }
                }
                false
            }
            LogicalOperator::Not => {
                // NOT: 子节点按隐式 AND 组合后取反，遇到 false 即可确定结果
                for (i, child) in children.iter().enumerate() {
                    let child_path = format!("{}.children[{}]", path, i);
                    if !self.evaluate_node(child, context, result, &child_path, depth + 1) {
                        if self.policy.trace {
                            result
                                .evaluation_trace
                                .push(format!("{}: NOT 短路 - 子节点 {} 不匹配", path, i));
                        }
                        return true;
                    }
                }
                false
            }
        }
    }

    fn record_fault(
        &self,
        result: &mut RuleEvaluationResult,
        path: &str,
        field: String,
        message: impl Into<String>,
    ) {
        let message = message.into();
        if self.policy.trace {
            result
                .evaluation_trace
                .push(format!("{}: 评估故障 - {}", path, message));
        }
        result.diagnostics.push(EvaluationDiagnostic {
            path: path.to_string(),
            field: Some(field),
            message,
        });
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}
