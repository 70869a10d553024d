use crate::data::column::ColumnType;
use crate::data::datatable::{parse_instant, DataValue};
use std::cmp::Ordering;

/// Rank used to order values of different types against each other.
/// Order: Null < Boolean < Integer/Float < String < DateTime
fn type_rank(value: &DataValue) -> u8 {
    match value {
        DataValue::Null => 0,
        DataValue::Boolean(_) => 1,
        DataValue::Integer(_) | DataValue::Float(_) => 2,
        DataValue::String(_) => 3,
        DataValue::DateTime(_) => 4,
    }
}

/// Compare two DataValues by their runtime type.
///
/// Values of different types order by `type_rank`, so the result is a total
/// order over every value.
pub fn compare_datavalues(a: &DataValue, b: &DataValue) -> Ordering {
    match (a, b) {
        (DataValue::Integer(a), DataValue::Integer(b)) => a.cmp(b),
        (DataValue::Float(a), DataValue::Float(b)) => a.total_cmp(b),

        // Numerically first; an integer sorts before the float it rounds to
        (DataValue::Integer(i), DataValue::Float(f)) => {
            (*i as f64).total_cmp(f).then(Ordering::Less)
        }
        (DataValue::Float(f), DataValue::Integer(i)) => {
            f.total_cmp(&(*i as f64)).then(Ordering::Greater)
        }

        (DataValue::String(a), DataValue::String(b)) => compare_text(a, b),
        (DataValue::Boolean(a), DataValue::Boolean(b)) => a.cmp(b),
        // Parseable instants first, then the raw text
        (DataValue::DateTime(a), DataValue::DateTime(b)) => {
            match (parse_instant(a), parse_instant(b)) {
                (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            }
        }

        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Locale-style text comparison: case-insensitive first, then case as tie-break
pub fn compare_text(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| a.cmp(b))
}

/// Type-aware comparison driven by the column's declared type.
///
/// Number columns compare numerically, date columns by instant, everything
/// else as text. Values that coerce sort before values that do not, and the
/// latter fall back to `compare_datavalues`, which keeps the order total.
pub fn compare_typed(a: &DataValue, b: &DataValue, column_type: ColumnType) -> Ordering {
    match column_type {
        ColumnType::Number => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => compare_datavalues(a, b),
        },
        ColumnType::Date => match (a.as_instant(), b.as_instant()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => compare_datavalues(a, b),
        },
        ColumnType::Text | ColumnType::Select => compare_text(&a.to_string(), &b.to_string()),
        ColumnType::Boolean => compare_datavalues(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_comparison() {
        assert_eq!(
            compare_datavalues(&DataValue::Integer(1), &DataValue::Integer(2)),
            Ordering::Less
        );
        assert_eq!(
            compare_datavalues(&DataValue::Integer(2), &DataValue::Integer(2)),
            Ordering::Equal
        );
        assert_eq!(
            compare_datavalues(&DataValue::Integer(3), &DataValue::Integer(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_mixed_numeric_comparison() {
        assert_eq!(
            compare_datavalues(&DataValue::Integer(2), &DataValue::Float(1.5)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_text_comparison_ignores_case_first() {
        assert_eq!(compare_text("apple", "Banana"), Ordering::Less);
        assert_eq!(compare_text("Zed", "apple"), Ordering::Greater);
        assert_ne!(compare_text("a", "A"), Ordering::Equal);
    }

    #[test]
    fn test_number_column_compares_numeric_strings() {
        // "10" < "9" as text, but not as numbers
        assert_eq!(
            compare_typed(&"10".into(), &"9".into(), ColumnType::Number),
            Ordering::Greater
        );
        assert_eq!(
            compare_typed(&"10".into(), &"9".into(), ColumnType::Text),
            Ordering::Less
        );
    }

    #[test]
    fn test_date_column_compares_instants() {
        let a = DataValue::DateTime("2024-01-02".to_string());
        let b = DataValue::DateTime("2023-12-31T23:00:00Z".to_string());
        assert_eq!(compare_typed(&a, &b, ColumnType::Date), Ordering::Greater);
    }

    #[test]
    fn test_cross_type_comparison() {
        assert_eq!(
            compare_datavalues(&DataValue::Boolean(true), &DataValue::Integer(1)),
            Ordering::Less
        );
        assert_eq!(
            compare_datavalues(&DataValue::Float(1.0), &DataValue::String("a".to_string())),
            Ordering::Less
        );
    }

    #[test]
    fn test_mixed_number_column_is_a_total_order() {
        let values: Vec<DataValue> = vec![
            DataValue::String("abc".into()),
            DataValue::Integer(10),
            DataValue::String("9".into()),
            DataValue::Float(f64::NAN),
            DataValue::Boolean(true),
            DataValue::String("".into()),
            DataValue::Float(10.0),
            DataValue::DateTime("2024-01-01".into()),
            DataValue::String("Abc".into()),
            DataValue::Integer(-3),
        ];
        for a in &values {
            for b in &values {
                let ab = compare_typed(a, b, ColumnType::Number);
                assert_eq!(ab, compare_typed(b, a, ColumnType::Number).reverse());
                for c in &values {
                    let bc = compare_typed(b, c, ColumnType::Number);
                    if ab != Ordering::Greater && bc != Ordering::Greater {
                        assert_ne!(
                            compare_typed(a, c, ColumnType::Number),
                            Ordering::Greater,
                            "{:?} <= {:?} <= {:?}",
                            a,
                            b,
                            c
                        );
                    }
                }
            }
        }
        // Numeric values come before text that does not parse
        assert_eq!(
            compare_typed(&DataValue::Integer(10), &"abc".into(), ColumnType::Number),
            Ordering::Less
        );
    }
}
