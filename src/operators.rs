//! Built-in filter operators (`spec.md §4.3`, `§4.4`).

use crate::value::{QueryValue, ValueTypeTag};

pub const BUILTIN_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$contains", "$startsWith",
    "$endsWith",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_OPERATORS.contains(&name)
}

fn declared_types(name: &str) -> &'static [ValueTypeTag] {
    use ValueTypeTag::*;
    match name {
        "$eq" | "$ne" | "$in" | "$nin" => &[String, Number, Boolean],
        "$gt" | "$gte" | "$lt" | "$lte" => &[Number],
        "$contains" | "$startsWith" | "$endsWith" => &[String],
        _ => &[],
    }
}

/// Evaluate a built-in operator. Returns `None` when the operator name is
/// not a built-in (caller should consult the plugin registry instead).
///
/// Per `spec.md §4.4`: "Operators on a field whose runtime value type is
/// not in the operator's declared types are silently ignored (as if
/// absent)" — modeled here as returning `true` (absent filters never
/// exclude a candidate). "`$eq:null`/`$ne:null` compare equality" even
/// though `Null` has no type tag.
pub fn evaluate_builtin(name: &str, field_value: &QueryValue, operand: &QueryValue) -> Option<bool> {
    if !is_builtin(name) {
        return None;
    }

    if matches!(name, "$eq" | "$ne") && (field_value.is_null() || operand.is_null()) {
        let eq = field_value == operand;
        return Some(if name == "$eq" { eq } else { !eq });
    }

    if field_value.is_null() {
        // spec.md §4.4: operator evaluation on null/undefined yields false,
        // except the $eq/$ne:null case handled above.
        return Some(false);
    }

    let declared = declared_types(name);
    if let Some(tag) = field_value.type_tag() {
        if !declared.is_empty() && !declared.contains(&tag) {
            return Some(true); // silently ignored => as if absent
        }
    }

    let result = match name {
        "$eq" => field_value == operand,
        "$ne" => field_value != operand,
        "$gt" => numeric_cmp(field_value, operand, |a, b| a > b),
        "$gte" => numeric_cmp(field_value, operand, |a, b| a >= b),
        "$lt" => numeric_cmp(field_value, operand, |a, b| a < b),
        "$lte" => numeric_cmp(field_value, operand, |a, b| a <= b),
        "$in" => operand
            .as_seq()
            .map(|items| items.contains(field_value))
            .unwrap_or(false),
        "$nin" => operand
            .as_seq()
            .map(|items| !items.contains(field_value))
            .unwrap_or(true),
        "$contains" => match (field_value.as_text(), operand.as_text()) {
            (Some(f), Some(o)) => f.contains(o),
            _ => false,
        },
        "$startsWith" => match (field_value.as_text(), operand.as_text()) {
            (Some(f), Some(o)) => f.starts_with(o),
            _ => false,
        },
        "$endsWith" => match (field_value.as_text(), operand.as_text()) {
            (Some(f), Some(o)) => f.ends_with(o),
            _ => false,
        },
        _ => unreachable!("checked by is_builtin"),
    };

    Some(result)
}

fn numeric_cmp(field_value: &QueryValue, operand: &QueryValue, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (field_value.as_number(), operand.as_number()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_null_compares_equality() {
        assert_eq!(
            evaluate_builtin("$eq", &QueryValue::Null, &QueryValue::Null),
            Some(true)
        );
        assert_eq!(
            evaluate_builtin("$ne", &QueryValue::Null, &QueryValue::Text("x".into())),
            Some(true)
        );
    }

    #[test]
    fn type_mismatch_is_ignored_as_absent() {
        // $gt declared for Number only; a string field value should be
        // treated as if the operator were absent (=> true).
        assert_eq!(
            evaluate_builtin("$gt", &QueryValue::Text("x".into()), &QueryValue::Number(1.0)),
            Some(true)
        );
    }

    #[test]
    fn null_field_value_fails_non_eq_operators() {
        assert_eq!(
            evaluate_builtin("$gt", &QueryValue::Null, &QueryValue::Number(1.0)),
            Some(false)
        );
    }
}
