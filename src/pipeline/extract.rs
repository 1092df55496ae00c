//! Structured extraction: one oracle call, then repair, validate, post-process.
//!
//! ## Why validate on `serde_json::Value`?
//!
//! A typed `Deserialize` of the reply would reject the whole document the
//! moment one region carried `"width": "wide"`. The oracle is unreliable in
//! exactly that way, so each field is looked up by hand and every problem
//! becomes one entry in the [`ValidationReport`] instead. Only a missing
//! `metadata` object or `items` array is fatal.
//!
//! ## Field names
//!
//! Both the wire names from [`crate::prompts::RESPONSE_SHAPE`] and the older
//! exam vocabulary are accepted (`questions`, `allImages`, `questionNumber`,
//! `questionText`, `imageId`, `type`, `isEssential`, `coordinates`,
//! `pageNumber`, `relatedImages`). The first non-null alias wins.
//!
//! ## Which regions get cropped
//!
//! Only the flat `regions` list reaches the region engine. Regions embedded
//! in an item describe the item's assets for linking; an embedded region
//! missing from the flat list is never cropped.

use crate::config::{DocumentType, PipelineConfig};
use crate::error::{OracleResponseError, PipelineError};
use crate::model::{Choice, Item, Metadata, PageImage, Rect, RegionCandidate, StructuredDocument, ValidationReport};
use crate::pipeline::oracle::ExtractionOracle;
use crate::pipeline::repair::{self, Strategy};
use crate::prompts;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ITEMS: &[&str] = &["items", "questions"];
const FLAT_REGIONS: &[&str] = &["regions", "allImages"];
const ITEM_NUMBER: &[&str] = &["itemNumber", "questionNumber"];
const ITEM_TEXT: &[&str] = &["text", "questionText"];
const ITEM_REGIONS: &[&str] = &["regions", "relatedImages"];
const REGION_ID: &[&str] = &["regionId", "imageId"];
const REGION_KIND: &[&str] = &["kind", "type"];
const ESSENTIAL: &[&str] = &["essential", "isEssential"];
const BOUNDS: &[&str] = &["bounds", "coordinates"];
const PAGE: &[&str] = &["page", "pageNumber"];
const CHOICE_LABEL: &[&str] = &["label", "number"];

/// Type tag used when the oracle did not name one.
const DEFAULT_KIND: &str = "image";

/// Largest coordinate magnitude accepted in a region rectangle, in pixels.
const MAX_COORDINATE: f64 = 1_000_000.0;

const CIRCLED: [&str; 20] = [
    "①", "②", "③", "④", "⑤", "⑥", "⑦", "⑧", "⑨", "⑩", "⑪", "⑫", "⑬", "⑭", "⑮", "⑯", "⑰", "⑱", "⑲",
    "⑳",
];

/// Result of a successful extraction call.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub document: StructuredDocument,
    pub report: ValidationReport,
    /// Which repair strategy found the JSON payload.
    pub strategy: Strategy,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// Drives the oracle and turns its reply into a [`StructuredDocument`].
pub struct ExtractionAdapter {
    oracle: Arc<dyn ExtractionOracle>,
    prompt_override: Option<String>,
    expected_choices: usize,
}

impl ExtractionAdapter {
    pub fn new(oracle: Arc<dyn ExtractionOracle>, config: &PipelineConfig) -> Self {
        Self {
            oracle,
            prompt_override: config.prompt.clone(),
            expected_choices: config.expected_choice_count,
        }
    }

    /// Send every page to the oracle in one call and parse the reply.
    ///
    /// Transport failures surface as [`PipelineError::OracleTransport`];
    /// unusable replies as [`PipelineError::OracleResponse`].
    pub async fn extract(
        &self,
        pages: &[PageImage],
        document_type: DocumentType,
    ) -> Result<Extraction, PipelineError> {
        let prompt = match &self.prompt_override {
            Some(p) => p.clone(),
            None => prompts::extraction_prompt(document_type),
        };

        info!(
            "Requesting structured extraction from '{}' ({} pages, type={})",
            self.oracle.name(),
            pages.len(),
            document_type
        );
        let reply = self.oracle.complete(&prompt, pages).await?;

        let (mut document, report, strategy) = parse_reply(&reply.text, self.expected_choices)?;

        if document_type == DocumentType::Exam && document.document_type().is_none() {
            document
                .metadata
                .insert("documentType".into(), Value::from(document_type.as_str()));
        }

        for e in &report.errors {
            warn!("Extraction validation error: {}", e);
        }
        for w in &report.warnings {
            debug!("Extraction validation warning: {}", w);
        }
        info!(
            "Extraction parsed via {:?}: {} items, {} regions, {} errors, {} warnings",
            strategy,
            report.item_count,
            report.region_count,
            report.errors.len(),
            report.warnings.len()
        );

        Ok(Extraction {
            document,
            report,
            strategy,
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            duration_ms: reply.duration_ms,
        })
    }
}

/// Repair, validate and post-process a raw oracle reply.
pub fn parse_reply(
    raw: &str,
    expected_choices: usize,
) -> Result<(StructuredDocument, ValidationReport, Strategy), OracleResponseError> {
    let payload = repair::extract_json(raw).ok_or_else(|| OracleResponseError::NoJson {
        preview: repair::preview(raw, 120),
    })?;
    let (document, report) = validate(&payload.value, expected_choices)?;
    Ok((document, report, payload.strategy))
}

/// Validate a parsed payload and build the post-processed document.
///
/// Returns `Err` only for a missing `metadata` object or `items` array;
/// everything else is recorded in the report and the offending entry is
/// dropped or defaulted.
pub fn validate(
    value: &Value,
    expected_choices: usize,
) -> Result<(StructuredDocument, ValidationReport), OracleResponseError> {
    let Some(root) = value.as_object() else {
        return Err(OracleResponseError::InvalidShape {
            errors: vec!["response is not a JSON object".into()],
        });
    };

    let mut shape_errors = Vec::new();
    let metadata = root.get("metadata").and_then(Value::as_object);
    if metadata.is_none() {
        shape_errors.push("metadata section missing".to_string());
    }
    let raw_items = field(root, ITEMS).and_then(Value::as_array);
    if raw_items.is_none() {
        shape_errors.push("items array missing".to_string());
    }
    let (Some(metadata), Some(raw_items)) = (metadata, raw_items) else {
        return Err(OracleResponseError::InvalidShape {
            errors: shape_errors,
        });
    };

    let mut report = ValidationReport::default();

    // ── Flat region list ─────────────────────────────────────────────────
    let regions = match field(root, FLAT_REGIONS).and_then(Value::as_array) {
        Some(list) => {
            let mut seen = HashSet::new();
            list.iter()
                .enumerate()
                .filter_map(|(index, raw)| {
                    let candidate = parse_region(raw, index, None, "regions", &mut report)?;
                    Some(ensure_unique(candidate, index, &mut seen, &mut report))
                })
                .collect::<Vec<_>>()
        }
        None => {
            report
                .warnings
                .push("regions array missing; no regions will be cropped".into());
            Vec::new()
        }
    };

    // ── Items ────────────────────────────────────────────────────────────
    let mut items: Vec<Item> = Vec::with_capacity(raw_items.len());
    let mut seen_numbers = HashSet::new();
    for (position, raw) in raw_items.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            report
                .errors
                .push(format!("items[{position}]: not an object"));
            continue;
        };
        let Some(item_number) = field(obj, ITEM_NUMBER).and_then(as_u32) else {
            report
                .errors
                .push(format!("items[{position}]: item number missing"));
            continue;
        };
        if !seen_numbers.insert(item_number) {
            report.errors.push(format!(
                "Item {item_number}: duplicate item number, keeping the first occurrence"
            ));
            continue;
        }
        items.push(parse_item(obj, item_number, expected_choices, &mut report));
    }

    items.sort_by_key(|i| i.item_number);

    // ── Derived fields ───────────────────────────────────────────────────
    for item in &mut items {
        if item.regions.is_empty() {
            item.regions = regions
                .iter()
                .filter(|r| r.item_number == Some(item.item_number))
                .cloned()
                .collect();
        }
        item.has_images = !item.regions.is_empty();
        item.image_count = item.regions.len();
    }

    let mut metadata = metadata.clone();
    enrich_metadata(&mut metadata, &items, regions.len());

    report.item_count = items.len();
    report.region_count = regions.len();

    Ok((
        StructuredDocument {
            metadata,
            items,
            regions,
        },
        report,
    ))
}

fn parse_item(
    obj: &Map<String, Value>,
    item_number: u32,
    expected_choices: usize,
    report: &mut ValidationReport,
) -> Item {
    let text = match field(obj, ITEM_TEXT).and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => {
            report
                .errors
                .push(format!("Item {item_number}: text missing"));
            String::new()
        }
    };

    let choices: Vec<Choice> = obj
        .get("choices")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(parse_choice).collect())
        .unwrap_or_default();

    if expected_choices > 0 {
        if choices.len() != expected_choices {
            report.warnings.push(format!(
                "Item {item_number}: expected {expected_choices} choices, found {}",
                choices.len()
            ));
        }
        if !choices.is_empty() {
            for label in CIRCLED.iter().take(expected_choices) {
                if !choices.iter().any(|c| c.label.contains(label)) {
                    report
                        .warnings
                        .push(format!("Item {item_number}: choice {label} missing"));
                }
            }
        }
    }

    let mut regions = Vec::new();
    if let Some(list) = field(obj, ITEM_REGIONS).and_then(Value::as_array) {
        let mut seen = HashSet::new();
        let context = format!("Item {item_number} regions");
        for (index, raw) in list.iter().enumerate() {
            if let Some(c) = parse_region(raw, index, Some(item_number), &context, report) {
                regions.push(ensure_unique(c, index, &mut seen, report));
            }
        }
    }

    Item {
        item_number,
        text,
        passage: opt_string(obj.get("passage")),
        choices,
        markers: obj
            .get("markers")
            .or_else(|| obj.get("specialMarkers"))
            .filter(|v| !v.is_null())
            .cloned(),
        item_type: opt_string(obj.get("itemType").or_else(|| obj.get("questionType"))),
        difficulty: opt_string(obj.get("difficulty")),
        points: obj.get("points").and_then(Value::as_f64),
        regions,
        has_images: false,
        image_count: 0,
    }
}

fn parse_choice(raw: &Value) -> Option<Choice> {
    match raw {
        Value::String(s) => Some(Choice {
            label: String::new(),
            text: s.clone(),
        }),
        Value::Object(obj) => Some(Choice {
            label: field(obj, CHOICE_LABEL)
                .map(scalar_string)
                .unwrap_or_default(),
            text: obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => None,
    }
}

/// Parse one region candidate. `owner` is the enclosing item for embedded
/// regions. Returns `None` (with an error entry) when the rectangle is unusable.
fn parse_region(
    raw: &Value,
    index: usize,
    owner: Option<u32>,
    context: &str,
    report: &mut ValidationReport,
) -> Option<RegionCandidate> {
    let Some(obj) = raw.as_object() else {
        report
            .errors
            .push(format!("{context}[{index}]: not an object"));
        return None;
    };
    let label = field(obj, REGION_ID)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{index}"));

    let Some(bounds) = field(obj, BOUNDS).and_then(Value::as_object) else {
        report
            .errors
            .push(format!("{context}[{index}] ({label}): bounds missing"));
        return None;
    };

    let coords = ["x", "y", "width", "height"].map(|k| bounds.get(k).and_then(Value::as_f64));
    let [Some(x), Some(y), Some(width), Some(height)] = coords else {
        report.errors.push(format!(
            "{context}[{index}] ({label}): bounds must have numeric x, y, width and height"
        ));
        return None;
    };
    if [x, y, width, height]
        .iter()
        .any(|v| !v.is_finite() || v.abs() > MAX_COORDINATE)
    {
        report.errors.push(format!(
            "{context}[{index}] ({label}): bounds out of range (limit {MAX_COORDINATE} px)"
        ));
        return None;
    }
    if width <= 0.0 || height <= 0.0 {
        report.errors.push(format!(
            "{context}[{index}] ({label}): width and height must be positive, got {width}x{height}"
        ));
        return None;
    }

    let page = match field(bounds, PAGE).or_else(|| field(obj, PAGE)).and_then(as_u32) {
        Some(p) if p >= 1 => p,
        _ => {
            report.warnings.push(format!(
                "{context}[{index}] ({label}): page missing, assuming page 1"
            ));
            1
        }
    };

    let item_number = match owner {
        Some(n) => Some(field(obj, ITEM_NUMBER).and_then(as_u32).unwrap_or(n)),
        None => {
            let n = field(obj, ITEM_NUMBER).and_then(as_u32);
            if n.is_none() {
                report.warnings.push(format!(
                    "{context}[{index}] ({label}): item number missing, region will be unlinked"
                ));
            }
            n
        }
    };

    let kind = field(obj, REGION_KIND)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_KIND)
        .to_string();

    let region_id = field(obj, REGION_ID)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| generated_id(item_number, &kind, index));

    Some(RegionCandidate {
        region_id,
        item_number,
        kind,
        bounds: Rect {
            page,
            x: x.round() as i64,
            y: y.round() as i64,
            width: width.round().max(1.0) as u32,
            height: height.round().max(1.0) as u32,
        },
        essential: field(obj, ESSENTIAL)
            .and_then(Value::as_bool)
            .unwrap_or(true),
        description: opt_string(obj.get("description")),
        content_analysis: obj
            .get("contentAnalysis")
            .filter(|v| !v.is_null())
            .cloned(),
    })
}

/// `img_q{item}_{type}_{index:03}`; `index` is the position in extraction order.
pub fn generated_id(item_number: Option<u32>, kind: &str, index: usize) -> String {
    match item_number {
        Some(n) => format!("img_q{n}_{kind}_{index:03}"),
        None => format!("img_q0_{kind}_{index:03}"),
    }
}

/// Replace a colliding identifier with a generated one, suffixing until unique.
fn ensure_unique(
    mut candidate: RegionCandidate,
    index: usize,
    seen: &mut HashSet<String>,
    report: &mut ValidationReport,
) -> RegionCandidate {
    if seen.insert(candidate.region_id.clone()) {
        return candidate;
    }
    let base = generated_id(candidate.item_number, &candidate.kind, index);
    let mut fresh = base.clone();
    let mut n = 1;
    while seen.contains(&fresh) {
        fresh = format!("{base}_{n}");
        n += 1;
    }
    report.warnings.push(format!(
        "region id {} repeated, renamed to {}",
        candidate.region_id, fresh
    ));
    seen.insert(fresh.clone());
    candidate.region_id = fresh;
    candidate
}

fn enrich_metadata(metadata: &mut Metadata, items: &[Item], region_count: usize) {
    if !metadata.contains_key("questionRange") {
        if let (Some(first), Some(last)) = (items.first(), items.last()) {
            metadata.insert(
                "questionRange".into(),
                Value::from(format!("{}-{}", first.item_number, last.item_number)),
            );
        }
    }
    metadata.insert("imageCount".into(), Value::from(region_count));
    metadata.insert("hasImages".into(), Value::from(region_count > 0));
}

// ── Value helpers ────────────────────────────────────────────────────────────

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| obj.get(*n))
        .find(|v| !v.is_null())
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn opt_string(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::pipeline::oracle::OracleReply;
    use async_trait::async_trait;
    use serde_json::json;

    fn five_choices() -> Value {
        json!([
            {"label": "①", "text": "a"},
            {"label": "②", "text": "b"},
            {"label": "③", "text": "c"},
            {"label": "④", "text": "d"},
            {"label": "⑤", "text": "e"}
        ])
    }

    #[test]
    fn missing_metadata_and_items_is_fatal() {
        let err = validate(&json!({"regions": []}), 5).unwrap_err();
        match err {
            OracleResponseError::InvalidShape { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("metadata"));
                assert!(errors[1].contains("items"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(validate(&json!([1, 2]), 5).is_err());
    }

    #[test]
    fn missing_regions_array_is_a_warning() {
        let (doc, report) = validate(
            &json!({"metadata": {}, "items": [{"itemNumber": 1, "text": "q", "choices": five_choices()}]}),
            5,
        )
        .unwrap();
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("regions array missing")));
        assert!(doc.regions.is_empty());
        assert_eq!(doc.metadata["hasImages"], false);
        assert_eq!(doc.metadata["imageCount"], 0);
    }

    #[test]
    fn items_sorted_and_deduplicated() {
        let (doc, report) = validate(
            &json!({
                "metadata": {},
                "items": [
                    {"itemNumber": 3, "text": "third"},
                    {"itemNumber": 1, "text": "first"},
                    {"itemNumber": 3, "text": "dup"},
                    {"text": "no number"}
                ],
                "regions": []
            }),
            0,
        )
        .unwrap();
        let numbers: Vec<u32> = doc.items.iter().map(|i| i.item_number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(doc.items[1].text, "third");
        assert_eq!(report.errors.len(), 2);
        assert_eq!(doc.metadata["questionRange"], "1-3");
    }

    #[test]
    fn choice_warnings() {
        let (_, report) = validate(
            &json!({
                "metadata": {},
                "items": [{
                    "itemNumber": 1,
                    "text": "q",
                    "choices": [{"label": "①", "text": "a"}, {"label": "②", "text": "b"}]
                }],
                "regions": []
            }),
            5,
        )
        .unwrap();
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("expected 5 choices")));
        assert!(report.warnings.iter().any(|w| w.contains("③")));
    }

    #[test]
    fn missing_text_is_an_error_but_item_is_kept() {
        let (doc, report) = validate(
            &json!({"metadata": {}, "items": [{"itemNumber": 2}], "regions": []}),
            0,
        )
        .unwrap();
        assert_eq!(doc.items.len(), 1);
        assert_eq!(doc.items[0].text, "");
        assert!(report.errors[0].contains("text missing"));
    }

    #[test]
    fn bad_regions_are_dropped_with_errors() {
        let (doc, report) = validate(
            &json!({
                "metadata": {},
                "items": [{"itemNumber": 1, "text": "q"}],
                "regions": [
                    {"regionId": "ok", "itemNumber": 1, "kind": "table",
                     "bounds": {"page": 1, "x": 10.4, "y": 20.6, "width": 100, "height": 80}},
                    {"regionId": "neg", "itemNumber": 1,
                     "bounds": {"page": 1, "x": 0, "y": 0, "width": -5, "height": 80}},
                    {"regionId": "text", "itemNumber": 1,
                     "bounds": {"page": 1, "x": "left", "y": 0, "width": 5, "height": 80}},
                    {"regionId": "nobounds", "itemNumber": 1}
                ]
            }),
            0,
        )
        .unwrap();
        assert_eq!(doc.regions.len(), 1);
        assert_eq!(report.errors.len(), 3);
        let r = &doc.regions[0];
        assert_eq!((r.bounds.x, r.bounds.y), (10, 21));
        assert!(r.essential);
        assert_eq!(doc.items[0].image_count, 1);
        assert!(doc.items[0].has_images);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let (doc, report) = validate(
            &json!({
                "metadata": {},
                "items": [{"itemNumber": 1, "text": "q"}],
                "regions": [
                    {"regionId": "far", "itemNumber": 1,
                     "bounds": {"page": 1, "x": 1e19, "y": 0, "width": 100, "height": 100}},
                    {"regionId": "huge", "itemNumber": 1,
                     "bounds": {"page": 1, "x": 0, "y": 0, "width": 1e12, "height": 100}}
                ]
            }),
            0,
        )
        .unwrap();
        assert!(doc.regions.is_empty());
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|e| e.contains("out of range")));
    }

    #[test]
    fn legacy_vocabulary_is_accepted() {
        let (doc, report) = validate(
            &json!({
                "metadata": {"subject": "biology"},
                "questions": [{
                    "questionNumber": 4,
                    "questionText": "Which graph?",
                    "choices": [
                        {"number": "①", "text": "a"}, {"number": "②", "text": "b"},
                        {"number": "③", "text": "c"}, {"number": "④", "text": "d"},
                        {"number": "⑤", "text": "e"}
                    ]
                }],
                "allImages": [{
                    "imageId": "g1",
                    "questionNumber": 4,
                    "type": "graph",
                    "isEssential": false,
                    "coordinates": {"pageNumber": 2, "x": 0, "y": 0, "width": 300, "height": 300}
                }]
            }),
            5,
        )
        .unwrap();
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        let item = &doc.items[0];
        assert_eq!(item.text, "Which graph?");
        assert_eq!(item.choices[2].label, "③");
        assert_eq!(item.regions[0].region_id, "g1");
        assert_eq!(item.regions[0].bounds.page, 2);
        assert!(!item.regions[0].essential);
        assert_eq!(item.regions[0].kind, "graph");
    }

    #[test]
    fn ids_generated_and_collisions_renamed() {
        let b = json!({"page": 1, "x": 0, "y": 0, "width": 60, "height": 60});
        let (doc, report) = validate(
            &json!({
                "metadata": {},
                "items": [{"itemNumber": 1, "text": "q"}],
                "regions": [
                    {"itemNumber": 1, "kind": "table", "bounds": b},
                    {"regionId": "dup", "itemNumber": 1, "kind": "graph", "bounds": b},
                    {"regionId": "dup", "itemNumber": 1, "kind": "graph", "bounds": b}
                ]
            }),
            0,
        )
        .unwrap();
        let ids: Vec<&str> = doc.regions.iter().map(|r| r.region_id.as_str()).collect();
        assert_eq!(ids, vec!["img_q1_table_000", "dup", "img_q1_graph_002"]);
        assert!(report.warnings.iter().any(|w| w.contains("repeated")));
    }

    #[test]
    fn unowned_region_warns_and_stays_unassigned() {
        let (doc, report) = validate(
            &json!({
                "metadata": {},
                "items": [],
                "regions": [{"kind": "figure",
                    "bounds": {"page": 1, "x": 0, "y": 0, "width": 60, "height": 60}}]
            }),
            0,
        )
        .unwrap();
        assert_eq!(doc.regions[0].item_number, None);
        assert_eq!(doc.regions[0].region_id, "img_q0_figure_000");
        assert!(report.warnings.iter().any(|w| w.contains("unlinked")));
    }

    #[test]
    fn parse_reply_reports_no_json() {
        let err = parse_reply("I'm sorry, I cannot help with that.", 5).unwrap_err();
        assert!(matches!(err, OracleResponseError::NoJson { .. }));
    }

    struct Scripted(&'static str);

    #[async_trait]
    impl ExtractionOracle for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _prompt: &str, _pages: &[PageImage]) -> Result<OracleReply, OracleError> {
            Ok(OracleReply::text(self.0))
        }
    }

    #[tokio::test]
    async fn adapter_parses_fenced_reply_and_tags_exam() {
        let oracle = Arc::new(Scripted(
            "Here you go:\n```json\n{\"metadata\": {}, \"items\": [{\"itemNumber\": 1, \"text\": \"q\"}], \"regions\": []}\n```\nDone {really}.",
        ));
        let config = PipelineConfig::builder().expected_choice_count(0).build().unwrap();
        let adapter = ExtractionAdapter::new(oracle, &config);
        let out = adapter.extract(&[], DocumentType::Exam).await.unwrap();
        assert_eq!(out.strategy, Strategy::FencedBlock);
        assert_eq!(out.document.items.len(), 1);
        assert_eq!(out.document.document_type(), Some("exam"));
    }

    #[tokio::test]
    async fn adapter_surfaces_shape_errors() {
        let oracle = Arc::new(Scripted("{\"items\": []}"));
        let adapter = ExtractionAdapter::new(oracle, &PipelineConfig::default());
        let err = adapter.extract(&[], DocumentType::Auto).await.unwrap_err();
        assert!(matches!(err, PipelineError::OracleResponse(_)));
    }
}
