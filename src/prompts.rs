//! Prompts for the structured-extraction oracle call.
//!
//! Every prompt lives here so the response shape the parser expects and the
//! shape the oracle is asked for can be read side by side. Callers can
//! override the whole prompt via [`crate::config::PipelineConfig::prompt`].

use crate::config::{DocumentType, MIN_REGION_PX};

/// Rules that keep the oracle's JSON parseable.
pub const JSON_RULES: &str = r#"## JSON RESPONSE RULES

Produce valid JSON only. Follow these rules strictly:

1. Escape special characters inside strings: "He said \"Hello\""
2. Remove line breaks: no \n or \r inside any text value
3. No comma after the last element of an array: [1, 2, 3]
4. No comma after the last property of an object: {"a": 1, "b": 2}"#;

/// The exact response shape, with one worked item and one region.
pub const RESPONSE_SHAPE: &str = r#"```json
{
  "metadata": {
    "documentType": "exam",
    "year": "2026",
    "examType": "national mock exam",
    "subject": "biology",
    "period": 1,
    "institution": "issuing authority",
    "totalPages": 2,
    "hasImages": true,
    "imageCount": 1
  },
  "items": [
    {
      "itemNumber": 1,
      "text": "Which statement about the table below is correct?",
      "passage": "summary of the passage (at most 200 characters)",
      "choices": [
        { "label": "①", "text": "first choice" },
        { "label": "②", "text": "second choice" },
        { "label": "③", "text": "third choice" },
        { "label": "④", "text": "fourth choice" },
        { "label": "⑤", "text": "fifth choice" }
      ],
      "markers": {
        "circledNumbers": ["㉠", "㉡"],
        "specialLetters": ["ⓐ", "ⓑ"]
      },
      "regions": [
        {
          "regionId": "img_q1_table_001",
          "kind": "table",
          "description": "experiment result table",
          "essential": true,
          "bounds": { "page": 1, "x": 150, "y": 300, "width": 400, "height": 200 }
        }
      ],
      "itemType": "reading_comprehension",
      "difficulty": "standard"
    }
  ],
  "regions": [
    {
      "regionId": "img_q1_table_001",
      "itemNumber": 1,
      "kind": "table",
      "description": "experiment result table",
      "essential": true,
      "bounds": { "page": 1, "x": 150, "y": 300, "width": 400, "height": 200 }
    }
  ]
}
```"#;

fn preamble(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Exam => {
            "# EXAM PAPER STRUCTURING AND IMAGE EXTRACTION\n\n\
             Analyse the attached exam paper page images. Extract complete structured \
             data for every question and the exact coordinates of every visual element."
        }
        DocumentType::Auto => {
            "# DOCUMENT STRUCTURING AND IMAGE EXTRACTION\n\n\
             Analyse the attached document page images. Decide what kind of document it is, \
             report it as metadata.documentType, then extract complete structured data for \
             every numbered item and the exact coordinates of every visual element."
        }
    }
}

/// Build the single extraction prompt sent alongside all page images.
pub fn extraction_prompt(document_type: DocumentType) -> String {
    format!(
        r#"{preamble}

{rules}

## WHAT TO EXTRACT

### 1. Document metadata
- year, exam type, subject, period
- issuing institution, copyright notice
- range of item numbers

### 2. Every item, completely
- item number
- item text
- every choice (①②③④⑤) with its label
- special markers (㉠㉡㉢, ⓐⓑⓒ, …)

### 3. Coordinates of every visual element
- tables: experiment data, statistics
- graphs: line charts, bar charts
- diagrams: process and structure diagrams
- figures: apparatus drawings, photographs

## COORDINATE REQUIREMENTS
- Absolute pixel coordinates relative to the page image, origin at the top-left corner
- Include a small margin so the element can be cropped cleanly
- Only report elements of at least {min}x{min} pixels
- `page` is the 1-based index of the attached image

## RESPONSE FORMAT
Respond with exactly this structure and nothing else:

{shape}

Return only the JSON. No explanations, no markdown outside the JSON block."#,
        preamble = preamble(document_type),
        rules = JSON_RULES,
        min = MIN_REGION_PX,
        shape = RESPONSE_SHAPE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::repair;

    #[test]
    fn prompt_mentions_minimum_size_and_origin() {
        let p = extraction_prompt(DocumentType::Exam);
        assert!(p.contains("50x50"));
        assert!(p.contains("top-left"));
        assert!(p.starts_with("# EXAM PAPER"));
    }

    #[test]
    fn auto_prompt_asks_for_document_type() {
        let p = extraction_prompt(DocumentType::Auto);
        assert!(p.contains("metadata.documentType"));
    }

    #[test]
    fn worked_example_is_parseable() {
        let parsed = repair::extract_json(RESPONSE_SHAPE).expect("example must parse");
        assert!(parsed.value["items"].is_array());
        assert!(parsed.value["regions"].is_array());
    }
}
