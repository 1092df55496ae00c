//! Linking: attach stored assets to their items by item number.
//!
//! Pure and deterministic: no I/O, and the same document and assets always
//! produce the same output. Two sources describe each asset, so the merge is
//! split by field group:
//!
//! * [`merge_description`]: what the region *is* (kind, description,
//!   essential flag, content analysis). The item's embedded candidate wins
//!   because it was produced in the item's context.
//! * [`merge_storage`]: where the bytes *are* (locator, key, crop box, byte
//!   size, requested rectangle). Only the asset knows this.

use crate::model::{
    AssetDescription, AssetStorage, ExtractedAsset, ImageStatistics, Item, LinkedItem,
    RegionCandidate, StructuredDocument,
};
use std::collections::{BTreeMap, HashSet};

/// Items with their assets, plus assets that matched no item.
#[derive(Debug, Clone, PartialEq)]
pub struct Linked {
    pub items: Vec<LinkedItem>,
    pub unlinked: Vec<ExtractedAsset>,
}

/// Merge `assets` into the document's items.
pub fn link(document: &StructuredDocument, assets: &[ExtractedAsset]) -> Linked {
    let mut claimed = HashSet::new();

    let items = document
        .items
        .iter()
        .map(|item| {
            let images: Vec<ExtractedAsset> = assets
                .iter()
                .enumerate()
                .filter(|(_, a)| a.item_number() == Some(item.item_number))
                .map(|(i, asset)| {
                    claimed.insert(i);
                    let embedded = item
                        .regions
                        .iter()
                        .find(|r| r.region_id == asset.region_id());
                    ExtractedAsset {
                        description: merge_description(&asset.description, embedded),
                        storage: merge_storage(&asset.storage),
                    }
                })
                .collect();
            link_item(item, images)
        })
        .collect();

    let unlinked = assets
        .iter()
        .enumerate()
        .filter(|(i, _)| !claimed.contains(i))
        .map(|(_, a)| a.clone())
        .collect();

    Linked { items, unlinked }
}

/// Descriptive fields: the embedded candidate overrides the asset's copy.
///
/// `region_id` and `item_number` are the join keys and always come from the
/// asset.
pub fn merge_description(
    asset: &AssetDescription,
    embedded: Option<&RegionCandidate>,
) -> AssetDescription {
    match embedded {
        None => asset.clone(),
        Some(c) => AssetDescription {
            region_id: asset.region_id.clone(),
            item_number: asset.item_number,
            kind: c.kind.clone(),
            description: c.description.clone().or_else(|| asset.description.clone()),
            essential: c.essential,
            content_analysis: c
                .content_analysis
                .clone()
                .or_else(|| asset.content_analysis.clone()),
        },
    }
}

/// Storage fields: only the stored asset knows them.
pub fn merge_storage(asset: &AssetStorage) -> AssetStorage {
    asset.clone()
}

fn link_item(item: &Item, images: Vec<ExtractedAsset>) -> LinkedItem {
    let mut images_by_type: BTreeMap<String, usize> = BTreeMap::new();
    for img in &images {
        *images_by_type.entry(img.description.kind.clone()).or_default() += 1;
    }
    let image_statistics = ImageStatistics {
        total_images: images.len(),
        total_pixel_area: images.iter().map(|a| a.storage.crop.area()).sum(),
        images_by_type,
    };

    let mut linked_item = item.clone();
    linked_item.has_images = !images.is_empty();
    linked_item.image_count = images.len();

    LinkedItem {
        item: linked_item,
        image_types: image_statistics.images_by_type.keys().cloned().collect(),
        has_essential_images: images.iter().any(|a| a.description.essential),
        image_statistics,
        images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CropBox, Metadata, ProcessingStatus, Rect};
    use chrono::{TimeZone, Utc};

    fn bounds() -> Rect {
        Rect {
            page: 1,
            x: 0,
            y: 0,
            width: 100,
            height: 50,
        }
    }

    fn asset(id: &str, item: Option<u32>, kind: &str, essential: bool) -> ExtractedAsset {
        ExtractedAsset {
            description: AssetDescription {
                region_id: id.into(),
                item_number: item,
                kind: kind.into(),
                description: Some("flat".into()),
                essential,
                content_analysis: None,
            },
            storage: AssetStorage {
                locator: format!("https://cdn.test/{id}.png"),
                key: format!("{id}.png"),
                requested: bounds(),
                crop: CropBox {
                    x: 0,
                    y: 0,
                    width: 100,
                    height: 50,
                },
                byte_size: 321,
                padding: 0,
                uploaded_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                status: ProcessingStatus::Completed,
            },
        }
    }

    fn item(n: u32, regions: Vec<RegionCandidate>) -> Item {
        Item {
            item_number: n,
            text: format!("item {n}"),
            passage: None,
            choices: vec![],
            markers: None,
            item_type: None,
            difficulty: None,
            points: None,
            regions,
            has_images: false,
            image_count: 0,
        }
    }

    fn document() -> StructuredDocument {
        let embedded = RegionCandidate {
            region_id: "a".into(),
            item_number: Some(1),
            kind: "graph".into(),
            bounds: bounds(),
            essential: false,
            description: Some("embedded".into()),
            content_analysis: None,
        };
        StructuredDocument {
            metadata: Metadata::new(),
            items: vec![item(1, vec![embedded]), item(2, vec![])],
            regions: vec![],
        }
    }

    #[test]
    fn assets_join_by_item_number() {
        let assets = vec![
            asset("a", Some(1), "table", true),
            asset("b", Some(1), "table", true),
            asset("c", Some(99), "figure", false),
            asset("d", None, "figure", false),
        ];
        let linked = link(&document(), &assets);

        let first = &linked.items[0];
        assert_eq!(first.images.len(), 2);
        assert_eq!(first.item.image_count, 2);
        assert!(first.item.has_images);
        assert_eq!(first.image_statistics.total_pixel_area, 10_000);
        assert_eq!(first.image_statistics.images_by_type["graph"], 1);
        assert_eq!(first.image_statistics.images_by_type["table"], 1);
        assert_eq!(first.image_types, vec!["graph", "table"]);
        assert!(first.has_essential_images);

        let second = &linked.items[1];
        assert!(second.images.is_empty());
        assert!(!second.has_essential_images);

        let unlinked: Vec<&str> = linked.unlinked.iter().map(|a| a.region_id()).collect();
        assert_eq!(unlinked, vec!["c", "d"]);
    }

    #[test]
    fn embedded_candidate_wins_descriptive_fields_only() {
        let linked = link(&document(), &[asset("a", Some(1), "table", true)]);
        let merged = &linked.items[0].images[0];
        assert_eq!(merged.description.kind, "graph");
        assert_eq!(merged.description.description.as_deref(), Some("embedded"));
        assert!(!merged.description.essential);
        assert_eq!(merged.storage.locator, "https://cdn.test/a.png");
        assert_eq!(merged.storage.byte_size, 321);
    }

    #[test]
    fn linking_is_idempotent() {
        let doc = document();
        let assets = vec![asset("a", Some(1), "table", true), asset("z", Some(7), "figure", true)];
        let first = link(&doc, &assets);
        let second = link(&doc, &assets);
        assert_eq!(first, second);

        // Re-linking the linked output changes nothing.
        let relinked_doc = StructuredDocument {
            metadata: doc.metadata.clone(),
            items: first.items.iter().map(|i| i.item.clone()).collect(),
            regions: vec![],
        };
        let relinked_assets: Vec<ExtractedAsset> = first
            .items
            .iter()
            .flat_map(|i| i.images.clone())
            .chain(first.unlinked.clone())
            .collect();
        assert_eq!(link(&relinked_doc, &relinked_assets), first);
    }
}
