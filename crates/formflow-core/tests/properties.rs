//! Property tests for recomputation, validation and persistence

use chrono::{TimeZone, Utc};
use formflow_core::{
    evaluate, format_scalar, scope_value, validate_field, DerivedFieldError, Engine, Field,
    FieldId, FieldKind, FieldValue, Form, FormId, FormRepository, InMemoryFormRepository,
    JsonFileFormRepository, Scope,
};
use proptest::prelude::*;

fn id(i: usize) -> FieldId {
    FieldId::new(format!("f{i}")).unwrap()
}

/// Numbers followed by derived fields whose parents are arbitrary earlier or
/// later positions, so cycles, chains and dangling references all show up.
fn arb_fields() -> impl Strategy<Value = Vec<Field>> {
    (1usize..5, 0usize..6).prop_flat_map(|(numbers, derived)| {
        let total = numbers + derived;
        (
            // quarter steps survive the JSON round trip exactly
            prop::collection::vec((-4_000i32..4_000).prop_map(|n| f64::from(n) / 4.0), numbers),
            prop::collection::vec(prop::collection::vec(0..total + 2, 0..3), derived),
            prop::collection::vec(prop::sample::select(vec!["+", "-", "*", "/"]), derived),
        )
            .prop_map(move |(values, parents, ops)| {
                let mut fields = Vec::new();
                for (i, v) in values.iter().enumerate() {
                    let mut field = Field::new(id(i), FieldKind::Number, None);
                    field.set_value(*v).unwrap();
                    fields.push(field);
                }
                for (j, (refs, op)) in parents.iter().zip(&ops).enumerate() {
                    let mut field = Field::new(id(numbers + j), FieldKind::Derived, None);
                    let parent_ids: Vec<FieldId> = refs.iter().map(|&r| id(r)).collect();
                    let formula = if parent_ids.is_empty() {
                        "1".to_string()
                    } else {
                        parent_ids
                            .iter()
                            .map(FieldId::as_str)
                            .collect::<Vec<_>>()
                            .join(&format!(" {op} "))
                    };
                    field.set_parent_field_ids(parent_ids).unwrap();
                    field.set_formula(formula).unwrap();
                    fields.push(field);
                }
                fields
            })
    })
}

proptest! {
    #[test]
    fn test_recompute_is_idempotent(fields in arb_fields()) {
        let engine = Engine::default();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let once = engine.recompute_at(&fields, now).into_fields();
        let twice = engine.recompute_at(&once, now);
        prop_assert!(!twice.changed());
        prop_assert_eq!(twice.fields(), &once[..]);
    }

    #[test]
    fn test_derived_values_match_their_formulas(fields in arb_fields()) {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let out = Engine::default().recompute_at(&fields, now).into_fields();

        let mut scope = Scope::with_now(now.timestamp_millis() as f64);
        let mut evaluated = Vec::new();
        for field in &out {
            if !field.is_derived() {
                scope.insert(field.id().as_str(), scope_value(field));
                continue;
            }
            for parent in field.parent_field_ids() {
                if !out.iter().any(|f| f.id() == parent) {
                    scope.insert(parent.as_str(), 0.0);
                }
            }
            let succeeded = matches!(
                field.derived_status(),
                None | Some(DerivedFieldError::MissingDependency { .. })
            );
            if let (true, FieldValue::Text(text)) = (succeeded, field.value()) {
                scope.insert(field.id().as_str(), text.parse::<f64>().unwrap());
                evaluated.push((field, text));
            }
        }

        for (field, text) in evaluated {
            let formula = field.formula().unwrap_or_default();
            let expected = evaluate(formula, &scope).unwrap();
            prop_assert_eq!(format_scalar(expected), text, "{} = {}", field.id(), formula);
        }
    }

    #[test]
    fn test_raising_minimum_keeps_violation(
        value in -100.0f64..100.0,
        min in -100.0f64..100.0,
        raise in 0.0f64..50.0,
    ) {
        let mut field = Field::new(id(0), FieldKind::Number, None);
        field.set_numeric_bounds(Some(min), None).unwrap();
        let before = validate_field(&field, &value.into());
        field.set_numeric_bounds(Some(min + raise), None).unwrap();
        let after = validate_field(&field, &value.into());
        for v in &before {
            prop_assert!(after.iter().any(|a| a.kind == v.kind));
        }
    }

    #[test]
    fn test_raising_min_length_keeps_violation(
        text in "[a-z0-9]{0,12}",
        min in 0u32..10,
        raise in 0u32..5,
    ) {
        let mut field = Field::new(id(0), FieldKind::Textarea, None);
        field.set_length_bounds(Some(min), None).unwrap();
        let before = validate_field(&field, &text.as_str().into());
        field.set_length_bounds(Some(min + raise), None).unwrap();
        let after = validate_field(&field, &text.as_str().into());
        for v in &before {
            prop_assert!(after.iter().any(|a| a.kind == v.kind));
        }
    }

    #[test]
    fn test_repository_round_trip(
        name in "[A-Za-z ]{1,20}",
        fields in arb_fields(),
        secs in 0i64..2_000_000_000,
    ) {
        let fields = Engine::default().recompute(&fields).into_fields();
        let form = Form::from_parts(
            FormId::generate(),
            name,
            fields,
            Utc.timestamp_opt(secs, 0).unwrap(),
        );

        let memory = InMemoryFormRepository::new();
        let id = memory.save(&form).unwrap();
        prop_assert_eq!(memory.load(&id).unwrap(), form.clone());

        let dir = tempfile::tempdir().unwrap();
        let files = JsonFileFormRepository::open(dir.path()).unwrap();
        let id = files.save(&form).unwrap();
        prop_assert_eq!(files.load(&id).unwrap(), form);
    }
}
