//! 条件评估器性能基准测试
//!
//! 针对 ConditionEvaluator 的各类操作符进行细粒度的性能测试。

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use regex::Regex;
use risk_engine::{Condition, ConditionEvaluator, Operator, ValueType};
use serde_json::{json, Value};
use std::hint::black_box;

fn eval(field: Option<&Value>, cond: &Condition) {
    let _ = ConditionEvaluator::evaluate(black_box(field), black_box(cond), &cond.value, None);
}

/// 数值比较操作基准
fn bench_numeric_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("numeric_operations");

    let field = json!(1000);

    for op in [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
    ] {
        let cond = Condition::new("amount", op, 500);
        group.bench_function(op.to_string(), |b| b.iter(|| eval(Some(&field), &cond)));
    }

    let between = Condition::new("amount", Operator::Between, json!([100, 2000]));
    group.bench_function("BETWEEN", |b| b.iter(|| eval(Some(&field), &between)));

    // 声明 NUMBER 时的数值字符串归一化
    let typed = Condition::new("amount", Operator::Equals, "1000").with_value_type(ValueType::Number);
    group.bench_function("EQUALS_numeric_string", |b| {
        b.iter(|| eval(Some(&field), &typed))
    });

    group.finish();
}

/// 字符串操作基准
fn bench_string_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_operations");

    let field = json!("hello world");

    let contains = Condition::new("msg", Operator::Contains, "world");
    group.bench_function("CONTAINS", |b| b.iter(|| eval(Some(&field), &contains)));

    let starts = Condition::new("msg", Operator::StartsWith, "hello");
    group.bench_function("STARTS_WITH", |b| b.iter(|| eval(Some(&field), &starts)));

    let ends = Condition::new("msg", Operator::EndsWith, "world");
    group.bench_function("ENDS_WITH", |b| b.iter(|| eval(Some(&field), &ends)));

    group.finish();
}

/// 正则表达式操作基准（模式预编译，一次编译反复匹配）
fn bench_regex_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("regex_operations");

    let email = json!("user@example.com");

    let simple_cond = Condition::new("email", Operator::Regex, r"^user");
    let simple_re = Regex::new(r"^user").unwrap();
    group.bench_function("simple_regex", |b| {
        b.iter(|| {
            ConditionEvaluator::evaluate(
                black_box(Some(&email)),
                black_box(&simple_cond),
                &simple_cond.value,
                Some(&simple_re),
            )
        })
    });

    let complex_cond = Condition::new("email", Operator::Regex, r"^[\w.-]+@[\w.-]+\.\w+$");
    let complex_re = Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$").unwrap();
    group.bench_function("complex_regex", |b| {
        b.iter(|| {
            ConditionEvaluator::evaluate(
                black_box(Some(&email)),
                black_box(&complex_cond),
                &complex_cond.value,
                Some(&complex_re),
            )
        })
    });

    group.finish();
}

/// 数组操作基准
fn bench_array_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_operations");

    let field = json!(["a", "b", "c", "d", "e"]);

    let any = Condition::new("tags", Operator::ContainsAny, json!(["b", "d"]));
    group.bench_function("CONTAINS_ANY", |b| b.iter(|| eval(Some(&field), &any)));

    let all = Condition::new("tags", Operator::ContainsAll, json!(["b", "d"]));
    group.bench_function("CONTAINS_ALL", |b| b.iter(|| eval(Some(&field), &all)));

    let single = Condition::new("tags", Operator::Contains, "c");
    group.bench_function("CONTAINS_single", |b| b.iter(|| eval(Some(&field), &single)));

    group.finish();
}

/// IN 操作符不同列表大小的性能
fn bench_in_operator_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_operator_scaling");

    let field = json!("target");

    for size in [5, 10, 50, 100, 500].iter() {
        let list: Vec<Value> = (0..*size)
            .map(|i| {
                if i == size - 1 {
                    json!("target")
                } else {
                    json!(format!("item_{}", i))
                }
            })
            .collect();
        let cond = Condition::new("country", Operator::In, Value::Array(list));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| eval(Some(&field), &cond))
        });
    }

    group.finish();
}

/// 存在性检查基准
fn bench_existence_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("existence_checks");

    let value = json!("present");
    let exists = Condition::new("field", Operator::Exists, json!(null));
    let not_exists = Condition::new("field", Operator::NotExists, json!(null));

    group.bench_function("EXISTS_present", |b| b.iter(|| eval(Some(&value), &exists)));
    group.bench_function("EXISTS_missing", |b| b.iter(|| eval(None, &exists)));
    group.bench_function("NOT_EXISTS_missing", |b| b.iter(|| eval(None, &not_exists)));

    group.finish();
}

/// 地理距离基准
fn bench_geo_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("geo_operations");

    let point = json!({"lat": 38.7223, "lon": -9.1393});
    let cond = Condition::new(
        "geo",
        Operator::GeoDistance,
        json!({"lat": 40.4168, "lon": -3.7038, "radius_km": 600.0}),
    );

    group.bench_function("GEO_DISTANCE", |b| b.iter(|| eval(Some(&point), &cond)));

    group.finish();
}

/// 时间操作基准
fn bench_time_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("time_operations");

    let field_time = json!("2025-01-15T10:00:00Z");

    let before = Condition::new("ts", Operator::TimeBefore, "2025-01-20T10:00:00Z");
    group.bench_function("TIME_BEFORE", |b| b.iter(|| eval(Some(&field_time), &before)));

    let after = Condition::new("ts", Operator::TimeAfter, "2025-01-10T10:00:00Z");
    group.bench_function("TIME_AFTER", |b| b.iter(|| eval(Some(&field_time), &after)));

    let range = Condition::new(
        "ts",
        Operator::TimeRange,
        json!({"start": "2025-01-01T00:00:00Z", "end": "2025-01-31T23:59:59Z"}),
    );
    group.bench_function("TIME_RANGE", |b| b.iter(|| eval(Some(&field_time), &range)));

    // 纯日期格式
    let date_field = json!("2025-01-15");
    let date_before = Condition::new("ts", Operator::TimeBefore, "2025-01-20");
    group.bench_function("TIME_BEFORE_date_only", |b| {
        b.iter(|| eval(Some(&date_field), &date_before))
    });

    group.finish();
}

/// 缺失字段处理基准
fn bench_missing_field(c: &mut Criterion) {
    let mut group = c.benchmark_group("missing_field");

    let eq = Condition::new("field", Operator::Equals, "test");
    group.bench_function("EQUALS_missing", |b| b.iter(|| eval(None, &eq)));

    let gt = Condition::new("field", Operator::Gt, 100);
    group.bench_function("GT_missing", |b| b.iter(|| eval(None, &gt)));

    group.finish();
}

criterion_group!(
    benches,
    bench_numeric_operations,
    bench_string_operations,
    bench_regex_operations,
    bench_array_operations,
    bench_in_operator_scaling,
    bench_existence_checks,
    bench_geo_operations,
    bench_time_operations,
    bench_missing_field,
);

criterion_main!(benches);
