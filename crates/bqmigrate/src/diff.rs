//! Schema diffing, merging, and transition validation.
//!
//! All functions take column slices, normalize internally, and return new
//! trees — nothing here mutates its inputs, so source and target never
//! alias each other's substructures.
//!
//! `diff_columns(source, target)` is directional: it returns "target minus
//! source". The orchestrator computes the add set as `diff(before, target)`
//! and the drop set as `diff(target, before)`.

use bqmigrate_schema::{
    Column, FieldMode, SchemaError, find_column_by_name, flatten_columns, normalize_columns,
};

/// Columns present in `target` but not in `source`.
///
/// Membership is normalized deep equality. For same-named `RECORD` columns
/// on both sides the diff recurses into `fields`; the column is kept only
/// if the recursive diff is non-empty, with `fields` replaced by it.
pub fn diff_columns(source: &[Column], target: &[Column]) -> Vec<Column> {
    diff_normalized(&normalize_columns(source), &normalize_columns(target))
}

fn diff_normalized(source: &[Column], target: &[Column]) -> Vec<Column> {
    let mut out = Vec::new();
    for tgt in target {
        if source.contains(tgt) {
            continue;
        }
        let Some(src) = find_column_by_name(source, &tgt.name) else {
            out.push(tgt.clone());
            continue;
        };
        if !(tgt.is_record() && src.is_record() && !tgt.fields.is_empty() && !src.fields.is_empty())
        {
            out.push(tgt.clone());
            continue;
        }
        let diff_fields = diff_normalized(&src.fields, &tgt.fields);
        if diff_fields.is_empty() {
            continue;
        }
        let mut kept = tgt.clone();
        kept.fields = diff_fields;
        out.push(kept);
    }
    out
}

/// True iff the two column lists are equal up to normalization.
pub fn schemas_equal(a: &[Column], b: &[Column]) -> bool {
    diff_columns(a, b).is_empty() && diff_columns(b, a).is_empty()
}

/// Like [`diff_columns`], but a column is excluded as soon as any column of
/// the same name exists in `source` at that level, regardless of type or
/// mode — except `RECORD` columns, which recurse to find genuinely new
/// nested fields.
///
/// This computes the set of columns that must be patched onto a table
/// before a rewrite query can select them.
pub fn diff_columns_by_name(source: &[Column], target: &[Column]) -> Vec<Column> {
    diff_by_name_normalized(&normalize_columns(source), &normalize_columns(target))
}

fn diff_by_name_normalized(source: &[Column], target: &[Column]) -> Vec<Column> {
    let mut out = Vec::new();
    for tgt in target {
        if source.contains(tgt) {
            continue;
        }
        let Some(src) = find_column_by_name(source, &tgt.name) else {
            out.push(tgt.clone());
            continue;
        };
        if tgt.is_record() && src.is_record() && !tgt.fields.is_empty() && !src.fields.is_empty() {
            let diff_fields = diff_by_name_normalized(&src.fields, &tgt.fields);
            if !diff_fields.is_empty() {
                let mut kept = tgt.clone();
                kept.fields = diff_fields;
                out.push(kept);
            }
        }
    }
    out
}

/// Merge `source` into `target` with caller-wins semantics: target values
/// always take priority, and source only fills what target left unset.
///
/// For each source column with a same-named target column, the target's
/// `mode` is filled from the source only where unset; same-named `RECORD`
/// columns with fields on both sides merge recursively. Source columns
/// missing from `target` are appended with mode defaulting to `NULLABLE`.
pub fn reverse_merge(source: &[Column], target: &[Column]) -> Vec<Column> {
    let mut merged: Vec<Column> = target.to_vec();
    for src in source {
        match merged.iter_mut().find(|c| c.name == src.name) {
            Some(tgt) => {
                if tgt.mode.is_none() {
                    tgt.mode = Some(src.mode.unwrap_or(FieldMode::Nullable));
                }
                if tgt.is_record()
                    && src.is_record()
                    && !tgt.fields.is_empty()
                    && !src.fields.is_empty()
                {
                    tgt.fields = reverse_merge(&src.fields, &tgt.fields);
                }
            }
            None => {
                let mut added = src.clone();
                added.mode = Some(added.mode.unwrap_or(FieldMode::Nullable));
                merged.push(added);
            }
        }
    }
    merged
}

/// Remove every leaf path of `drop_columns` from `target`, best effort.
///
/// A path whose intermediate segment is missing at any level is skipped
/// silently — dropping a column that is already gone is not an error.
pub fn reject_columns(drop_columns: &[Column], target: &[Column]) -> Vec<Column> {
    let mut out = target.to_vec();
    for path in flatten_columns(drop_columns).keys() {
        let segments: Vec<&str> = path.split('.').collect();
        remove_path(&mut out, &segments);
    }
    out
}

fn remove_path(columns: &mut Vec<Column>, segments: &[&str]) {
    match segments {
        [] => {}
        [leaf] => columns.retain(|c| c.name != *leaf),
        [head, rest @ ..] => {
            if let Some(column) = columns.iter_mut().find(|c| c.name == *head) {
                remove_path(&mut column.fields, rest);
            }
        }
    }
}

/// Reject transitions the warehouse cannot apply in place.
///
/// Type rules: a `RECORD` column must remain `RECORD`, and a `REPEATED`
/// column's type can not change. Mode transitions:
///
/// ```text
/// (new)    => NULLABLE, REPEATED
/// NULLABLE => NULLABLE
/// REQUIRED => REQUIRED, NULLABLE
/// REPEATED => REPEATED
/// ```
///
/// The walk is structural (by name at every level) rather than over the
/// flattened leaf map, so a `RECORD` column replaced by a scalar is caught
/// even though the two sides flatten to disjoint leaf paths.
pub fn validate_permitted_operations(
    source: &[Column],
    target: &[Column],
) -> Result<(), SchemaError> {
    validate_ops(
        &normalize_columns(source),
        &normalize_columns(target),
        None,
    )
}

fn validate_ops(
    source: &[Column],
    target: &[Column],
    prefix: Option<&str>,
) -> Result<(), SchemaError> {
    for tgt in target {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{}", tgt.name),
            None => tgt.name.clone(),
        };
        match find_column_by_name(source, &tgt.name) {
            Some(src) => {
                if src.is_record() && !tgt.is_record() {
                    return Err(SchemaError::RecordTypeChange {
                        column: path,
                        to: tgt.field_type,
                    });
                }
                if src.is_repeated() && src.field_type != tgt.field_type {
                    return Err(SchemaError::RepeatedTypeChange {
                        column: path,
                        from: src.field_type,
                        to: tgt.field_type,
                    });
                }
                validate_mode_transition(&path, src.mode, tgt.mode)?;
                if src.is_record() && tgt.is_record() {
                    validate_ops(&src.fields, &tgt.fields, Some(&path))?;
                }
            }
            None => {
                validate_mode_transition(&path, None, tgt.mode)?;
                if tgt.is_record() {
                    validate_ops(&[], &tgt.fields, Some(&path))?;
                }
            }
        }
    }
    Ok(())
}

fn validate_mode_transition(
    path: &str,
    from: Option<FieldMode>,
    to: Option<FieldMode>,
) -> Result<(), SchemaError> {
    let to = to.unwrap_or(FieldMode::Nullable);
    let Some(from) = from else {
        // brand-new column
        if to == FieldMode::Required {
            return Err(SchemaError::NewRequiredColumn {
                column: path.to_string(),
            });
        }
        return Ok(());
    };
    if from == to {
        return Ok(());
    }
    match (from, to) {
        (FieldMode::Required, FieldMode::Nullable) => Ok(()),
        _ => Err(SchemaError::ModeChange {
            column: path.to_string(),
            from,
            to,
        }),
    }
}

/// SELECT field list for the drop-rewrite query, in flattened target order.
///
/// Leaf paths present in both schemas are selected with an explicit cast,
/// `TYPE(path) AS path`. Paths new in `target` are selected bare: casting
/// NULL would flatten nested record paths into underscored aliases, so new
/// columns are patched onto the live table first and then selected as-is.
/// The PATCH-before-rewrite ordering is load bearing.
pub fn build_query_fields(source: &[Column], target: &[Column]) -> Vec<String> {
    let source = flatten_columns(&normalize_columns(source));
    let target = flatten_columns(&normalize_columns(target));
    target
        .iter()
        .map(|(path, flat)| {
            if source.contains_key(path) {
                format!("{}({path}) AS {path}", flat.field_type)
            } else {
                path.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqmigrate_schema::FieldType;

    fn col(name: &str, field_type: FieldType) -> Column {
        Column::new(name, field_type)
    }

    fn record(name: &str, fields: Vec<Column>) -> Column {
        Column::record(name, fields)
    }

    #[test]
    fn test_diff_empty_when_equal() {
        let columns = vec![col("id", FieldType::Integer), col("name", FieldType::String)];
        assert!(diff_columns(&columns, &columns).is_empty());
        assert!(schemas_equal(&columns, &columns));
    }

    #[test]
    fn test_diff_is_normalized_equality() {
        // unset mode and explicit NULLABLE are the same column
        let source = vec![col("id", FieldType::Integer)];
        let target = vec![col("id", FieldType::Integer).with_mode(FieldMode::Nullable)];
        assert!(diff_columns(&source, &target).is_empty());
        assert!(schemas_equal(&source, &target));
    }

    #[test]
    fn test_diff_directions_compute_add_and_drop() {
        let before = vec![col("id", FieldType::Integer), col("old", FieldType::String)];
        let target = vec![col("id", FieldType::Integer), col("new", FieldType::String)];

        let add = diff_columns(&before, &target);
        assert_eq!(add.len(), 1);
        assert_eq!(add[0].name, "new");

        let drop = diff_columns(&target, &before);
        assert_eq!(drop.len(), 1);
        assert_eq!(drop[0].name, "old");
    }

    #[test]
    fn test_diff_mode_change_is_a_diff() {
        let source = vec![col("id", FieldType::Integer)];
        let target = vec![col("id", FieldType::Integer).with_mode(FieldMode::Required)];
        let diff = diff_columns(&source, &target);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].mode, Some(FieldMode::Required));
    }

    #[test]
    fn test_diff_recurses_into_records() {
        let source = vec![record("r", vec![col("a", FieldType::String)])];
        let target = vec![record(
            "r",
            vec![col("a", FieldType::String), col("b", FieldType::Integer)],
        )];

        let diff = diff_columns(&source, &target);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].name, "r");
        // fields replaced by the recursive diff
        assert_eq!(diff[0].fields.len(), 1);
        assert_eq!(diff[0].fields[0].name, "b");

        // identical nested fields diff to nothing
        assert!(diff_columns(&target, &target).is_empty());
    }

    #[test]
    fn test_diff_by_name_ignores_type_and_mode() {
        let source = vec![col("id", FieldType::Integer)];
        let target = vec![
            col("id", FieldType::String).with_mode(FieldMode::Required),
            col("new", FieldType::String),
        ];
        let diff = diff_columns_by_name(&source, &target);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].name, "new");
    }

    #[test]
    fn test_diff_by_name_finds_new_nested_fields() {
        let source = vec![record("r", vec![col("a", FieldType::String)])];
        let target = vec![record(
            "r",
            vec![col("a", FieldType::String), col("b", FieldType::Integer)],
        )];
        let diff = diff_columns_by_name(&source, &target);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].fields.len(), 1);
        assert_eq!(diff[0].fields[0].name, "b");
    }

    #[test]
    fn test_reverse_merge_fills_unset_mode_only() {
        let source = vec![col("id", FieldType::Integer).with_mode(FieldMode::Required)];
        let target = vec![col("id", FieldType::Integer)];
        let merged = reverse_merge(&source, &target);
        assert_eq!(merged[0].mode, Some(FieldMode::Required));

        // target value wins when set
        let target = vec![col("id", FieldType::Integer).with_mode(FieldMode::Nullable)];
        let merged = reverse_merge(&source, &target);
        assert_eq!(merged[0].mode, Some(FieldMode::Nullable));
    }

    #[test]
    fn test_reverse_merge_appends_missing_columns() {
        let source = vec![
            col("id", FieldType::Integer).with_mode(FieldMode::Required),
            col("extra", FieldType::String),
        ];
        let target = vec![col("new", FieldType::String)];
        let merged = reverse_merge(&source, &target);
        let names: Vec<&str> = merged.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["new", "id", "extra"]);
        // appended copies default their mode
        assert_eq!(merged[2].mode, Some(FieldMode::Nullable));
        assert_eq!(merged[1].mode, Some(FieldMode::Required));
    }

    #[test]
    fn test_reverse_merge_recurses_into_records() {
        let source = vec![record(
            "r",
            vec![col("a", FieldType::String).with_mode(FieldMode::Required)],
        )];
        let target = vec![record(
            "r",
            vec![col("a", FieldType::String), col("b", FieldType::Integer)],
        )];
        let merged = reverse_merge(&source, &target);
        assert_eq!(merged[0].fields[0].mode, Some(FieldMode::Required));
        assert_eq!(merged[0].fields.len(), 2);
    }

    #[test]
    fn test_reject_drops_top_level_leaf() {
        let target = vec![col("id", FieldType::Integer), col("old", FieldType::String)];
        let drop = vec![col("old", FieldType::String)];
        let kept = reject_columns(&drop, &target);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "id");
    }

    #[test]
    fn test_reject_drops_nested_leaf() {
        let target = vec![record(
            "r",
            vec![col("a", FieldType::String), col("b", FieldType::Integer)],
        )];
        let drop = vec![record("r", vec![col("b", FieldType::Integer)])];
        let kept = reject_columns(&drop, &target);
        assert_eq!(kept[0].fields.len(), 1);
        assert_eq!(kept[0].fields[0].name, "a");
    }

    #[test]
    fn test_reject_skips_missing_paths_silently() {
        let target = vec![col("id", FieldType::Integer)];
        // leaf missing
        let drop = vec![col("ghost", FieldType::String)];
        assert_eq!(reject_columns(&drop, &target), target);
        // intermediate segment missing
        let drop = vec![record("ghost", vec![col("leaf", FieldType::String)])];
        assert_eq!(reject_columns(&drop, &target), target);
    }

    #[test]
    fn test_validate_allows_safe_transitions() {
        let nullable = vec![col("c", FieldType::String).with_mode(FieldMode::Nullable)];
        let required = vec![col("c", FieldType::String).with_mode(FieldMode::Required)];
        let repeated = vec![col("c", FieldType::String).with_mode(FieldMode::Repeated)];

        assert!(validate_permitted_operations(&nullable, &nullable).is_ok());
        assert!(validate_permitted_operations(&required, &nullable).is_ok());
        assert!(validate_permitted_operations(&required, &required).is_ok());
        assert!(validate_permitted_operations(&repeated, &repeated).is_ok());
        // brand-new NULLABLE / REPEATED columns
        assert!(validate_permitted_operations(&[], &nullable).is_ok());
        assert!(validate_permitted_operations(&[], &repeated).is_ok());
    }

    #[test]
    fn test_validate_rejects_forbidden_mode_transitions() {
        let nullable = vec![col("c", FieldType::String).with_mode(FieldMode::Nullable)];
        let required = vec![col("c", FieldType::String).with_mode(FieldMode::Required)];
        let repeated = vec![col("c", FieldType::String).with_mode(FieldMode::Repeated)];

        assert!(matches!(
            validate_permitted_operations(&nullable, &required),
            Err(SchemaError::ModeChange { .. })
        ));
        assert!(matches!(
            validate_permitted_operations(&nullable, &repeated),
            Err(SchemaError::ModeChange { .. })
        ));
        assert!(matches!(
            validate_permitted_operations(&required, &repeated),
            Err(SchemaError::ModeChange { .. })
        ));
        assert!(matches!(
            validate_permitted_operations(&repeated, &nullable),
            Err(SchemaError::ModeChange { .. })
        ));
        assert!(matches!(
            validate_permitted_operations(&[], &required),
            Err(SchemaError::NewRequiredColumn { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_record_becoming_scalar() {
        let source = vec![record("r", vec![col("a", FieldType::String)])];
        let target = vec![col("r", FieldType::String)];
        assert!(matches!(
            validate_permitted_operations(&source, &target),
            Err(SchemaError::RecordTypeChange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_repeated_type_change() {
        let source = vec![col("c", FieldType::Integer).with_mode(FieldMode::Repeated)];
        let target = vec![col("c", FieldType::String).with_mode(FieldMode::Repeated)];
        assert!(matches!(
            validate_permitted_operations(&source, &target),
            Err(SchemaError::RepeatedTypeChange { .. })
        ));
    }

    #[test]
    fn test_validate_names_nested_paths() {
        let source = vec![record(
            "r",
            vec![col("a", FieldType::String).with_mode(FieldMode::Nullable)],
        )];
        let target = vec![record(
            "r",
            vec![col("a", FieldType::String).with_mode(FieldMode::Repeated)],
        )];
        match validate_permitted_operations(&source, &target) {
            Err(SchemaError::ModeChange { column, .. }) => assert_eq!(column, "r.a"),
            other => panic!("expected ModeChange, got {other:?}"),
        }
    }

    #[test]
    fn test_build_query_fields_casts_existing_and_keeps_new_bare() {
        let source = vec![
            col("id", FieldType::Integer),
            record("r", vec![col("a", FieldType::String)]),
        ];
        let target = vec![
            col("id", FieldType::Integer),
            record(
                "r",
                vec![col("a", FieldType::String), col("b", FieldType::Float)],
            ),
            col("new", FieldType::String),
        ];
        let fields = build_query_fields(&source, &target);
        assert_eq!(
            fields,
            vec![
                "INTEGER(id) AS id".to_string(),
                "STRING(r.a) AS r.a".to_string(),
                "r.b".to_string(),
                "new".to_string(),
            ]
        );
    }
}
