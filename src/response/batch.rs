//! Batch responses: locating the answer collection and mapping each element
//! back to the position it answers.
use serde_json::{Map, Value};

use super::extract::{candidate_regions, repair_json, values_starting_with};
use super::{normalize_key, project, ParsedOutput};
use crate::error::ParseFailure;
use crate::record::{is_blank, Record};
use crate::schema::Schema;
use crate::value::normalize;

/// Field names accepted as an explicit position tag (compared case-insensitively).
const INDEX_KEYS: [&str; 5] = ["index", "position", "idx", "row", "_index"];

/// Parse a batch response into exactly `expected` results, in position order.
///
/// Elements are placed by an explicit index field, or by array order when no
/// element is tagged and the array length equals `expected`. Anything else
/// is dropped with a warning and its position reported as a parse failure.
/// An array naming no output column, such as a repeated input list, is passed
/// over when a later array does answer.
pub fn parse_batch(raw: &str, schema: &Schema, expected: usize) -> Vec<(usize, ParsedOutput)> {
    parse_with_keys(raw, schema, expected, None)
}

/// Like [`parse_batch`], but untagged elements may also be placed by echoing
/// the required input values of exactly one of `records`. An untagged element
/// that echoes inputs is placed only by its echo, never by array order.
pub fn parse_batch_keyed(
    raw: &str,
    schema: &Schema,
    records: &[&Record],
) -> Vec<(usize, ParsedOutput)> {
    parse_with_keys(raw, schema, records.len(), Some(records))
}

fn parse_with_keys(
    raw: &str,
    schema: &Schema,
    expected: usize,
    records: Option<&[&Record]>,
) -> Vec<(usize, ParsedOutput)> {
    let mut slots: Vec<Option<ParsedOutput>> = (0..expected).map(|_| None).collect();
    let elements = find_elements(raw, schema).or_else(|| {
        let repaired = repair_json(raw)?;
        tracing::debug!(schema = %schema.id, "batch response needed JSON repair");
        find_elements(&repaired, schema)
    });

    match elements {
        Some(elements) => place_elements(&elements, raw, schema, records, &mut slots),
        None => tracing::warn!(
            schema = %schema.id,
            expected,
            "batch response has no JSON array of results"
        ),
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(position, slot)| {
            let result = slot.unwrap_or_else(|| {
                Err(ParseFailure::new(
                    format!("response has no answer for position {position}"),
                    raw,
                ))
            });
            (position, result)
        })
        .collect()
}

/// The answer collection: the first array holding an answer to the schema,
/// else the first array of objects, else every loose object in the first
/// region that has any.
///
/// Preferring an answering array skips a repeated input list that precedes
/// the real answers.
fn find_elements(text: &str, schema: &Schema) -> Option<Vec<Value>> {
    let regions = candidate_regions(text);
    let mut arrays: Vec<Vec<Value>> = regions
        .iter()
        .flat_map(|region| values_starting_with(region, '['))
        .filter_map(|value| match value {
            Value::Array(items) if items.iter().any(Value::is_object) => Some(items),
            _ => None,
        })
        .collect();
    let chosen = arrays
        .iter()
        .position(|items| items.iter().any(|item| project(item, schema, 1).is_some()))
        .unwrap_or(0);
    if chosen < arrays.len() {
        return Some(arrays.swap_remove(chosen));
    }
    regions.iter().find_map(|region| {
        let objects: Vec<Value> = values_starting_with(region, '{');
        (!objects.is_empty()).then_some(objects)
    })
}

fn place_elements(
    elements: &[Value],
    raw: &str,
    schema: &Schema,
    records: Option<&[&Record]>,
    slots: &mut [Option<ParsedOutput>],
) {
    let expected = slots.len();
    let tagged: Vec<(Option<usize>, &Map<String, Value>)> = elements
        .iter()
        .enumerate()
        .filter_map(|(i, element)| match element.as_object() {
            Some(object) => Some((explicit_index(object, schema), object)),
            None => {
                tracing::warn!(element = i, "dropping non-object batch element");
                None
            }
        })
        .collect();

    let any_tagged = tagged.iter().any(|(index, _)| index.is_some());
    let shift = one_based_shift(&tagged, expected);
    let by_array_order = !any_tagged && tagged.len() == expected;
    let mut unplaced = Vec::new();

    for (i, (index, object)) in tagged.iter().enumerate() {
        let position = match index {
            Some(index) => index.checked_sub(shift),
            // An echoed input key outranks array order; an echo naming no
            // single record leaves the element unplaced.
            None => match records.filter(|_| echoes_inputs(object, schema)) {
                Some(records) => echoed_position(object, schema, records),
                None if by_array_order => Some(i),
                None => None,
            },
        };
        let Some(position) = position.filter(|position| *position < expected) else {
            tracing::warn!(
                element = i,
                index = ?index,
                expected,
                "dropping batch element with no usable position"
            );
            if by_array_order {
                unplaced.push(i);
            }
            continue;
        };
        if slots[position].is_some() {
            tracing::warn!(element = i, position, "dropping duplicate answer for position");
            continue;
        }
        let element = Value::Object((*object).clone());
        slots[position] = Some(project(&element, schema, 1).ok_or_else(|| {
            ParseFailure::new(
                format!("answer for position {position} has none of the output columns"),
                raw,
            )
        }));
    }

    for i in unplaced {
        if slots[i].is_none() {
            slots[i] = Some(Err(ParseFailure::new(
                format!("answer at array position {i} echoes inputs that match no single record"),
                raw,
            )));
        }
    }
}

/// Position tag carried by an element, unless the tag name is itself a
/// declared column.
fn explicit_index(object: &Map<String, Value>, schema: &Schema) -> Option<usize> {
    object.iter().find_map(|(key, value)| {
        let lowered = key.to_lowercase();
        if !INDEX_KEYS.contains(&lowered.as_str())
            || schema.input_column(key).is_some()
            || schema.output_column(key).is_some()
        {
            return None;
        }
        match value {
            Value::Number(number) => number.as_u64().map(|n| n as usize).or_else(|| {
                number
                    .as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as usize)
            }),
            Value::String(text) => text.trim().parse::<usize>().ok(),
            _ => None,
        }
    })
}

/// 1 when every tag lies in `1..=expected`, none is 0, and the largest equals
/// `expected`: the model counted from one.
fn one_based_shift(tagged: &[(Option<usize>, &Map<String, Value>)], expected: usize) -> usize {
    let indices: Vec<usize> = tagged.iter().filter_map(|(index, _)| *index).collect();
    let looks_one_based = !indices.is_empty()
        && indices.iter().all(|index| (1..=expected).contains(index))
        && indices.iter().max() == Some(&expected);
    usize::from(looks_one_based)
}

/// Whether the element repeats back a non-blank value for any input column.
fn echoes_inputs(object: &Map<String, Value>, schema: &Schema) -> bool {
    object.iter().any(|(key, value)| {
        let key = normalize_key(key);
        schema
            .input_columns
            .iter()
            .any(|column| normalize_key(&column.name) == key)
            && !is_blank(Some(value))
    })
}

/// The single record whose required inputs the element repeats back.
fn echoed_position(
    object: &Map<String, Value>,
    schema: &Schema,
    records: &[&Record],
) -> Option<usize> {
    let keyed: Vec<_> = object
        .iter()
        .map(|(key, value)| (normalize_key(key), value))
        .collect();
    let columns: Vec<_> = if schema.input_columns.iter().any(|column| column.required) {
        schema.input_columns.iter().filter(|column| column.required).collect()
    } else {
        schema.input_columns.iter().collect()
    };
    let matches: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| {
            let mut compared = 0;
            let all_equal = columns.iter().all(|column| {
                let expected = record.get(&column.name);
                if is_blank(expected) {
                    return true;
                }
                let wanted = normalize_key(&column.name);
                let Some((_, echoed)) = keyed.iter().find(|(key, _)| *key == wanted) else {
                    return false;
                };
                compared += 1;
                normalize(Some(*echoed), column.kind) == normalize(expected, column.kind)
            });
            all_equal && compared > 0
        })
        .map(|(position, _)| position)
        .collect();
    match matches.as_slice() {
        [position] => Some(*position),
        _ => None,
    }
}
