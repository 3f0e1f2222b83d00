//! Denormalizes nested wire rows into flat, fixed-width preview rows.
//!
//! The warehouse returns table data in a nested cell encoding: a row is
//! `{"f": [cells]}`, a cell is `{"v": value}`, and a value is a scalar, a
//! list of cells (`REPEATED`), or a nested row (`RECORD`). Preview output
//! wants spreadsheet-shaped rows instead, one flat value per leaf path of
//! the schema, with repeated data fanned out across extra rows that leave
//! every other cell null.

use bqmigrate_schema::{Column, leaf_count, normalize_columns};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A nested wire row: `{"f": [cells]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(rename = "f", default)]
    pub cells: Vec<Cell>,
}

/// One cell of a wire row: `{"v": value}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "v", default)]
    pub value: Value,
}

/// A cell's value. The wire encoding is positional, so the variant is
/// decided by the JSON shape alone: object means nested row, array means
/// repeated, anything else is a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Record(Row),
    Repeated(Vec<Cell>),
    Scalar(Json),
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(Json::Null)
    }
}

impl Value {
    /// The nested row, if any. An empty `{}` row is the wire encoding of
    /// an absent record and reads as `None`.
    pub fn as_record(&self) -> Option<&Row> {
        match self {
            Value::Record(row) if !row.cells.is_empty() => Some(row),
            _ => None,
        }
    }

    /// The repeated elements, or an empty slice for any other shape.
    pub fn as_list(&self) -> &[Cell] {
        match self {
            Value::Repeated(cells) => cells,
            _ => &[],
        }
    }

    /// The scalar value, or `Null` for any other shape.
    pub fn scalar(&self) -> &Json {
        match self {
            Value::Scalar(value) => value,
            _ => &Json::Null,
        }
    }
}

/// One denormalized output row, one value per leaf path in schema order.
pub type FlatRow = Vec<Json>;

/// A page of nested rows paired with the schema that describes them.
#[derive(Debug, Clone)]
pub struct TableData {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl TableData {
    pub fn new(columns: &[Column], rows: Vec<Row>) -> Self {
        TableData {
            columns: normalize_columns(columns),
            rows,
        }
    }

    /// Denormalize every source row into its group of flat rows.
    ///
    /// Each source row fans out into `max(repeated counts)` flat rows;
    /// index `i` of the group selects the `i`-th element of every repeated
    /// column, null elsewhere.
    pub fn generate(&self) -> Vec<Vec<FlatRow>> {
        self.rows
            .iter()
            .map(|row| {
                let fan_out = repeated_counts(&self.columns, row)
                    .into_iter()
                    .max()
                    .unwrap_or(1);
                (0..fan_out)
                    .map(|index| format_row(&self.columns, Some(row), index))
                    .collect()
            })
            .collect()
    }

    /// Flat rows in the legacy response shape: grouped per source row when
    /// any group fans out, a plain list of rows otherwise.
    pub fn values(&self) -> Json {
        let groups = self.generate();
        if groups.iter().any(|group| group.len() > 1) {
            Json::Array(
                groups
                    .into_iter()
                    .map(|group| Json::Array(group.into_iter().map(Json::Array).collect()))
                    .collect(),
            )
        } else {
            Json::Array(groups.into_iter().flatten().map(Json::Array).collect())
        }
    }
}

/// Per-column fan-out of one nested row.
///
/// A `REPEATED RECORD` contributes the sum of its elements' own fan-outs
/// (each element may itself repeat internally); a plain `RECORD` the max of
/// its nested counts; a repeated scalar its length; everything else 1.
/// Every count is at least 1 so a row with no repeated data still yields
/// one flat row.
fn repeated_counts(columns: &[Column], row: &Row) -> Vec<usize> {
    row.cells
        .iter()
        .zip(columns)
        .map(|(cell, column)| {
            if column.is_record() {
                if column.is_repeated() {
                    let elements = cell.value.as_list();
                    if elements.is_empty() {
                        1
                    } else {
                        element_counts(&column.fields, elements).into_iter().sum()
                    }
                } else {
                    match cell.value.as_record() {
                        Some(nested) => repeated_counts(&column.fields, nested)
                            .into_iter()
                            .max()
                            .unwrap_or(1),
                        None => 1,
                    }
                }
            } else if column.is_repeated() {
                cell.value.as_list().len().max(1)
            } else {
                1
            }
        })
        .collect()
}

/// Fan-out of each element of a repeated record column.
fn element_counts(fields: &[Column], elements: &[Cell]) -> Vec<usize> {
    elements
        .iter()
        .map(|element| match element.value.as_record() {
            Some(nested) => repeated_counts(fields, nested).into_iter().max().unwrap_or(1),
            None => 1,
        })
        .collect()
}

/// Build flat row `index` of a source row's group. Absent records null-fill
/// the full leaf width of their subtree so every flat row in a group has
/// the same length.
fn format_row(columns: &[Column], row: Option<&Row>, index: usize) -> FlatRow {
    let Some(row) = row else {
        return vec![Json::Null; leaf_count(columns)];
    };
    let mut out = Vec::new();
    for (cell, column) in row.cells.iter().zip(columns) {
        if column.is_record() {
            if column.is_repeated() {
                // elements own consecutive index windows sized by their
                // individual fan-outs
                let elements = cell.value.as_list();
                let counts = element_counts(&column.fields, elements);
                let mut offset = 0;
                let mut matched = false;
                for (element, count) in elements.iter().zip(&counts) {
                    if offset <= index && index < offset + count {
                        out.extend(format_row(
                            &column.fields,
                            element.value.as_record(),
                            index - offset,
                        ));
                        matched = true;
                    }
                    offset += count;
                }
                if !matched {
                    out.extend(vec![Json::Null; leaf_count(&column.fields)]);
                }
            } else {
                match cell.value.as_record() {
                    Some(nested) => out.extend(format_row(&column.fields, Some(nested), index)),
                    None => out.extend(vec![Json::Null; leaf_count(&column.fields)]),
                }
            }
        } else if column.is_repeated() {
            let value = cell
                .value
                .as_list()
                .get(index)
                .map(|element| element.value.scalar().clone())
                .unwrap_or(Json::Null);
            out.push(value);
        } else if index == 0 {
            out.push(cell.value.scalar().clone());
        } else {
            out.push(Json::Null);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqmigrate_schema::{FieldMode, FieldType};
    use serde_json::json;

    fn col(name: &str, field_type: FieldType) -> Column {
        Column::new(name, field_type)
    }

    fn repeated_record(name: &str, fields: Vec<Column>) -> Column {
        Column::record(name, fields).with_mode(FieldMode::Repeated)
    }

    fn parse_rows(value: Json) -> Vec<Row> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_wire_row_parses_nested_shapes() {
        let rows = parse_rows(json!([
            {"f": [
                {"v": "foo"},
                {"v": [{"v": "a"}, {"v": "b"}]},
                {"v": {"f": [{"v": "nested"}]}},
                {"v": null},
                {"v": {}},
            ]}
        ]));
        let cells = &rows[0].cells;
        assert_eq!(cells[0].value.scalar(), &json!("foo"));
        assert_eq!(cells[1].value.as_list().len(), 2);
        assert!(cells[2].value.as_record().is_some());
        assert_eq!(cells[3].value.scalar(), &Json::Null);
        // an empty row object is an absent record
        assert!(cells[4].value.as_record().is_none());
    }

    #[test]
    fn test_generate_flat_rows() {
        let columns = vec![
            col("string", FieldType::String),
            col("integer", FieldType::Integer),
            col("float", FieldType::Float),
        ];
        let rows = parse_rows(json!([
            {"f": [{"v": "foo"}, {"v": "1"}, {"v": "1.1"}]},
            {"f": [{"v": "bar"}, {"v": "2"}, {"v": "2.2"}]},
        ]));
        let data = TableData::new(&columns, rows);
        assert_eq!(
            data.generate(),
            vec![
                vec![vec![json!("foo"), json!("1"), json!("1.1")]],
                vec![vec![json!("bar"), json!("2"), json!("2.2")]],
            ]
        );
        // no fan-out: legacy shape is a plain list of rows
        assert_eq!(
            data.values(),
            json!([["foo", "1", "1.1"], ["bar", "2", "2.2"]])
        );
    }

    #[test]
    fn test_generate_fans_out_nested_repeats() {
        // elements of the repeated record repeat internally: 2 + 3 = 5 rows
        let columns = vec![repeated_record(
            "repeated_record",
            vec![Column::record(
                "record",
                vec![col("repeated_time", FieldType::Timestamp).with_mode(FieldMode::Repeated)],
            )],
        )];
        let rows = parse_rows(json!([
            {"f": [
                {"v": [
                    {"v": {"f": [
                        {"v": {"f": [
                            {"v": [{"v": "t1"}, {"v": "t2"}]}
                        ]}}
                    ]}},
                    {"v": {"f": [
                        {"v": {"f": [
                            {"v": [{"v": "t3"}, {"v": "t4"}, {"v": "t5"}]}
                        ]}}
                    ]}}
                ]}
            ]}
        ]));
        let data = TableData::new(&columns, rows);
        assert_eq!(
            data.generate(),
            vec![vec![
                vec![json!("t1")],
                vec![json!("t2")],
                vec![json!("t3")],
                vec![json!("t4")],
                vec![json!("t5")],
            ]]
        );
    }

    #[test]
    fn test_generate_repeated_scalar_in_middle() {
        let columns = vec![
            col("string", FieldType::String),
            col("integer", FieldType::Integer),
            col("repeated", FieldType::String).with_mode(FieldMode::Repeated),
            col("float", FieldType::Float),
        ];
        let rows = parse_rows(json!([
            {"f": [{"v": "foo"}, {"v": "1"}, {"v": []}, {"v": "1.1"}]},
            {"f": [{"v": "foo"}, {"v": "2"}, {"v": [{"v": "foo"}, {"v": "bar"}]}, {"v": "2.2"}]},
        ]));
        let data = TableData::new(&columns, rows);
        assert_eq!(
            data.generate(),
            vec![
                // an empty repeated column still yields one row, null there
                vec![vec![json!("foo"), json!("1"), Json::Null, json!("1.1")]],
                // the second flat row nulls every non-repeated cell
                vec![
                    vec![json!("foo"), json!("2"), json!("foo"), json!("2.2")],
                    vec![Json::Null, Json::Null, json!("bar"), Json::Null],
                ],
            ]
        );
        // fan-out switches the legacy shape to grouped rows
        assert_eq!(
            data.values(),
            json!([
                [["foo", "1", null, "1.1"]],
                [["foo", "2", "foo", "2.2"], [null, null, "bar", null]],
            ])
        );
    }

    #[test]
    fn test_generate_empty_repeated_record_null_fills_width() {
        let columns = vec![
            col("id", FieldType::Integer),
            repeated_record(
                "r",
                vec![col("a", FieldType::String), col("b", FieldType::String)],
            ),
        ];
        let rows = parse_rows(json!([
            {"f": [{"v": "1"}, {"v": []}]}
        ]));
        let data = TableData::new(&columns, rows);
        assert_eq!(
            data.generate(),
            vec![vec![vec![json!("1"), Json::Null, Json::Null]]]
        );
    }

    #[test]
    fn test_generate_complex_fan_out() {
        let columns = vec![
            repeated_record(
                "repeated_record",
                vec![
                    Column::record(
                        "record",
                        vec![
                            col("child", FieldType::String),
                            col("repeated_time", FieldType::Timestamp)
                                .with_mode(FieldMode::Repeated),
                        ],
                    ),
                    col("repeated_time", FieldType::Timestamp).with_mode(FieldMode::Repeated),
                ],
            ),
            col("repeated_string", FieldType::String).with_mode(FieldMode::Repeated),
            col("repeated_int", FieldType::Integer).with_mode(FieldMode::Repeated),
            repeated_record(
                "repeated_record2",
                vec![Column::record(
                    "record2",
                    vec![
                        col("repeated_float", FieldType::Float).with_mode(FieldMode::Repeated),
                        col("child2", FieldType::String).with_mode(FieldMode::Required),
                    ],
                )],
            ),
        ];
        let rows = parse_rows(json!([
            {"f": [
                {"v": [
                    {"v": {"f": [
                        {"v": {"f": [
                            {"v": "foo"},
                            {"v": [{"v": "1.44423E9"}, {"v": "1.4443164E9"}]}
                        ]}},
                        {"v": [{"v": "1.4444028E9"}, {"v": "1.4444028E9"}]}
                    ]}},
                    {"v": {"f": [
                        {"v": {"f": [
                            {"v": "fuga"},
                            {"v": []}
                        ]}},
                        {"v": [{"v": "1.4445756E9"}, {"v": "1.444662E9"}]}
                    ]}}
                ]},
                {"v": [{"v": "one"}, {"v": "two"}, {"v": "three"}]},
                {"v": [{"v": "1"}, {"v": "2"}]},
                {"v": [
                    {"v": {"f": [
                        {"v": {"f": [
                            {"v": [{"v": "1.1"}, {"v": "2.2"}, {"v": "3.3"}]},
                            {"v": "foo2"}
                        ]}}
                    ]}},
                    {"v": {"f": [
                        {"v": {"f": [
                            {"v": [{"v": "4.4"}, {"v": "5.5"}, {"v": "6.6"}, {"v": "7.7"}]},
                            {"v": "bar"}
                        ]}}
                    ]}}
                ]}
            ]}
        ]));
        let expected: Vec<Vec<FlatRow>> = vec![vec![
            vec![
                json!("foo"),
                json!("1.44423E9"),
                json!("1.4444028E9"),
                json!("one"),
                json!("1"),
                json!("1.1"),
                json!("foo2"),
            ],
            vec![
                Json::Null,
                json!("1.4443164E9"),
                json!("1.4444028E9"),
                json!("two"),
                json!("2"),
                json!("2.2"),
                Json::Null,
            ],
            vec![
                json!("fuga"),
                Json::Null,
                json!("1.4445756E9"),
                json!("three"),
                Json::Null,
                json!("3.3"),
                Json::Null,
            ],
            vec![
                Json::Null,
                Json::Null,
                json!("1.444662E9"),
                Json::Null,
                Json::Null,
                json!("4.4"),
                json!("bar"),
            ],
            vec![
                Json::Null,
                Json::Null,
                Json::Null,
                Json::Null,
                Json::Null,
                json!("5.5"),
                Json::Null,
            ],
            vec![
                Json::Null,
                Json::Null,
                Json::Null,
                Json::Null,
                Json::Null,
                json!("6.6"),
                Json::Null,
            ],
            vec![
                Json::Null,
                Json::Null,
                Json::Null,
                Json::Null,
                Json::Null,
                json!("7.7"),
                Json::Null,
            ],
        ]];
        assert_eq!(TableData::new(&columns, rows).generate(), expected);
    }
}
