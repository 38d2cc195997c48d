//! Persistent store tests: round trips, schema enforcement and container
//! integrity.

use wsi_tilestore::array::{DType, NdArray};
use wsi_tilestore::error::StoreError;
use wsi_tilestore::store::{
    Column, Counts, LabelValue, Labels, Scope, SlideMetadata, Store, Table,
};
use wsi_tilestore::tile::{Tile, TileCoord};

use super::test_utils::{rgb_slide, scratch};

fn metadata() -> SlideMetadata {
    SlideMetadata::new("store-test", vec![8, 8])
}

fn tile_pixels(seed: u8) -> NdArray {
    let values: Vec<u8> = (0..4 * 4 * 3).map(|i| (i as u8).wrapping_mul(seed)).collect();
    NdArray::from_vec(vec![4, 4, 3], values).unwrap()
}

fn sample_counts() -> Counts {
    let obs = Table::new(vec!["cell-1".into(), "cell-2".into(), "cell-3".into()])
        .unwrap()
        .with_column("area", Column::Float(vec![12.5, f64::NAN, -0.0]))
        .unwrap()
        .with_column("label", Column::Int(vec![1, 2, i64::MIN]))
        .unwrap()
        .with_column("kind", Column::Str(vec!["a".into(), "".into(), "ü".into()]))
        .unwrap()
        .with_column("border", Column::Bool(vec![true, false, true]))
        .unwrap();
    let var = Table::new(vec!["area".into()]).unwrap();
    Counts::new(obs, var)
}

// =============================================================================
// Round trip
// =============================================================================

#[tokio::test]
async fn test_full_round_trip_is_exact() {
    let (_dir, path) = scratch("roundtrip");
    let coords = [(0, 4), (0, 0), (4, 4), (4, 0)];

    {
        let store = Store::create(&path, metadata(), false).await.unwrap();
        for (i, &coord) in coords.iter().enumerate() {
            let mut labels = Labels::new();
            labels.insert("index", i as i64).unwrap();
            labels.insert("ratio", 1.0 / 3.0 + i as f64).unwrap();
            labels.insert("name", format!("tile-{}", i)).unwrap();
            store.put_tile(coord, tile_pixels(i as u8 + 1), labels).await.unwrap();

            let scope = Scope::Tile(coord.into());
            store
                .put_mask(&scope, "nuclei", NdArray::zeros(DType::I32, vec![4, 4]))
                .await
                .unwrap();
            store
                .put_mask(&scope, "tissue", NdArray::from_vec(vec![4, 4], vec![i as u8; 16]).unwrap())
                .await
                .unwrap();
        }

        store
            .put_mask(&Scope::Slide, "tissue", NdArray::zeros(DType::U8, vec![8, 8]))
            .await
            .unwrap();
        store.put_label(&Scope::Slide, "stain", "HE").await.unwrap();
        store.put_label(&Scope::Slide, "mpp", 0.2527).await.unwrap();
        store.put_label(&Scope::Slide, "tumor", false).await.unwrap();
        store
            .put_label(
                &Scope::Slide,
                "spacing",
                NdArray::from_vec(vec![2], vec![0.25f64, 0.5]).unwrap(),
            )
            .await
            .unwrap();
        store.put_counts(sample_counts()).await.unwrap();
        store.close().await.unwrap();
    }

    let store = Store::open(&path).await.unwrap();
    let expected: Vec<TileCoord> = coords.iter().map(|&c| c.into()).collect();
    assert_eq!(store.tile_coords().await, expected);

    for (i, coord) in expected.iter().enumerate() {
        let (pixels, labels) = store.get_tile(coord).await.unwrap();
        assert_eq!(pixels, tile_pixels(i as u8 + 1));
        assert_eq!(labels.get("index"), Some(&LabelValue::Int(i as i64)));
        assert_eq!(
            labels.get("ratio").and_then(LabelValue::as_float).map(f64::to_bits),
            Some((1.0 / 3.0 + i as f64).to_bits())
        );
        assert_eq!(labels.keys(), vec!["index", "ratio", "name"]);
        assert_eq!(
            store.mask_keys(&Scope::Tile(coord.clone())).await.unwrap(),
            vec!["nuclei", "tissue"]
        );
    }

    let slide_labels = store.labels(&Scope::Slide).await.unwrap();
    assert_eq!(slide_labels.keys(), vec!["stain", "mpp", "tumor", "spacing"]);
    assert_eq!(slide_labels.get("mpp"), Some(&LabelValue::Float(0.2527)));
    assert_eq!(
        slide_labels.get("spacing").and_then(LabelValue::as_array).unwrap().to_vec::<f64>().unwrap(),
        vec![0.25, 0.5]
    );

    // NaN and -0.0 survive bit for bit
    assert_eq!(store.get_counts().await, Some(sample_counts()));
    assert_eq!(store.metadata().await.name, "store-test");
}

#[tokio::test]
async fn test_counts_absent_vs_empty() {
    let (_dir, path) = scratch("counts");
    let store = Store::create(&path, metadata(), false).await.unwrap();
    assert_eq!(store.get_counts().await, None);

    store.put_counts(Counts::default()).await.unwrap();
    store.close().await.unwrap();

    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.get_counts().await, Some(Counts::default()));
}

#[tokio::test]
async fn test_append_obs_accumulates_rows() {
    let (_dir, path) = scratch("obs");
    let store = Store::create(&path, metadata(), false).await.unwrap();

    for id in ["a", "b"] {
        let rows = Table::new(vec![id.to_string()])
            .unwrap()
            .with_column("n", Column::Int(vec![1]))
            .unwrap();
        store.append_obs(rows).await.unwrap();
    }
    let dup = Table::new(vec!["a".to_string()])
        .unwrap()
        .with_column("n", Column::Int(vec![2]))
        .unwrap();
    assert!(matches!(store.append_obs(dup).await, Err(StoreError::DuplicateKey(_))));
    store.close().await.unwrap();

    let counts = Store::open(&path).await.unwrap().get_counts().await.unwrap();
    assert_eq!(counts.obs.index(), &["a".to_string(), "b".to_string()]);
    assert!(counts.var.is_empty());
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_replacing_tile_keeps_position_and_masks() {
    let (_dir, path) = scratch("replace");
    let store = Store::create(&path, metadata(), false).await.unwrap();

    store.put_tile((0, 0), tile_pixels(1), Labels::new()).await.unwrap();
    store.put_tile((0, 4), tile_pixels(2), Labels::new()).await.unwrap();
    store
        .masks(TileCoord::from((0, 0)))
        .add("m", NdArray::zeros(DType::U8, vec![4, 4]))
        .await
        .unwrap();

    store.put_tile((0, 0), tile_pixels(3), Labels::new()).await.unwrap();

    assert_eq!(
        store.tile_coords().await,
        vec![TileCoord::from((0, 0)), TileCoord::from((0, 4))]
    );
    let tile = store.load_tile(&TileCoord::from((0, 0))).await.unwrap();
    assert_eq!(tile.image, tile_pixels(3));
    assert_eq!(tile.masks.keys(), vec!["m"]);
}

#[tokio::test]
async fn test_schema_locked_by_first_tile() {
    let (_dir, path) = scratch("schema");
    let store = Store::create(&path, metadata(), false).await.unwrap();
    store.put_tile((0, 0), tile_pixels(1), Labels::new()).await.unwrap();

    let wrong_shape = NdArray::zeros(DType::U8, vec![4, 4]);
    assert!(matches!(
        store.put_tile((0, 4), wrong_shape, Labels::new()).await,
        Err(StoreError::ShapeMismatch { .. })
    ));
    let wrong_dtype = NdArray::zeros(DType::U16, vec![4, 4, 3]);
    assert!(matches!(
        store.put_tile((0, 4), wrong_dtype, Labels::new()).await,
        Err(StoreError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        store.put_tile((0, 0, 0), tile_pixels(1), Labels::new()).await,
        Err(StoreError::ShapeMismatch { .. })
    ));
    assert_eq!(store.tile_count().await, 1);

    let schema = store.metadata().await.tile_schema.unwrap();
    assert_eq!(schema.tile_shape, vec![4, 4, 3]);
}

#[tokio::test]
async fn test_declared_schema_is_enforced() {
    let (_dir, path) = scratch("declared");
    let meta = metadata().with_tile_schema(vec![2, 2], DType::F32);
    let store = Store::create(&path, meta, false).await.unwrap();

    assert!(store
        .put_tile((0, 0), NdArray::zeros(DType::F32, vec![2, 2]), Labels::new())
        .await
        .is_ok());
    assert!(store
        .put_tile((0, 2), NdArray::zeros(DType::F32, vec![4, 4]), Labels::new())
        .await
        .is_err());
}

#[tokio::test]
async fn test_missing_tiles() {
    let (_dir, path) = scratch("missing");
    let store = Store::create(&path, metadata(), false).await.unwrap();
    let coord = TileCoord::from((4, 4));

    assert!(matches!(store.get_tile(&coord).await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.remove_tile(&coord).await, Err(StoreError::NotFound(_))));
    assert!(!store.contains_tile(&coord).await);
}

#[tokio::test]
async fn test_remove_tile_drops_masks_and_labels() {
    let (_dir, path) = scratch("remove");
    {
        let store = Store::create(&path, metadata(), false).await.unwrap();
        let mut tile = Tile::new((0, 0), tile_pixels(1));
        tile.labels.insert("x", 1i64).unwrap();
        tile.masks.add("m", NdArray::zeros(DType::U8, vec![4, 4])).unwrap();
        store.commit_tile(tile).await.unwrap();
        store.put_tile((0, 4), tile_pixels(2), Labels::new()).await.unwrap();

        store.remove_tile(&TileCoord::from((0, 0))).await.unwrap();
        store.close().await.unwrap();
    }

    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.tile_coords().await, vec![TileCoord::from((0, 4))]);
    assert!(matches!(
        store.mask_keys(&Scope::Tile(TileCoord::from((0, 0)))).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_commit_tile_is_atomic() {
    let (_dir, path) = scratch("atomic");
    let store = Store::create(&path, metadata(), false).await.unwrap();

    let mut original = Tile::new((0, 0), tile_pixels(1));
    original.labels.insert("v", 1i64).unwrap();
    store.commit_tile(original.clone()).await.unwrap();

    // A mask of the wrong shape fails the whole commit.
    let mut bad = Tile::new((0, 0), tile_pixels(9));
    bad.labels.insert("v", 2i64).unwrap();
    bad.masks.add("m", NdArray::zeros(DType::U8, vec![3, 3])).unwrap();
    assert!(matches!(
        store.commit_tile(bad).await,
        Err(StoreError::ShapeMismatch { .. })
    ));

    assert_eq!(store.load_tile(&TileCoord::from((0, 0))).await.unwrap(), original);
}

// =============================================================================
// Labels
// =============================================================================

#[tokio::test]
async fn test_label_errors() {
    let (_dir, path) = scratch("labels");
    let store = Store::create(&path, metadata(), false).await.unwrap();

    assert!(matches!(
        store.put_label(&Scope::Slide, "", 1i64).await,
        Err(StoreError::InvalidKey(_))
    ));
    assert!(matches!(
        store.get_label(&Scope::Slide, "missing").await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.put_label(&Scope::Tile(TileCoord::from((0, 0))), "k", 1i64).await,
        Err(StoreError::NotFound(_))
    ));

    store.put_label(&Scope::Slide, "k", 1i64).await.unwrap();
    store.put_label(&Scope::Slide, "k", "now a string").await.unwrap();
    assert_eq!(
        store.get_label(&Scope::Slide, "k").await.unwrap(),
        LabelValue::from("now a string")
    );
    assert_eq!(
        store.remove_label(&Scope::Slide, "k").await.unwrap(),
        LabelValue::from("now a string")
    );
    assert!(store.labels(&Scope::Slide).await.unwrap().is_empty());
}

#[test]
fn test_unsupported_label_values() {
    for raw in ["null", "{\"a\": 1}", "[1, \"a\"]", "[[1, 2], [3]]"] {
        let value: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert!(
            matches!(LabelValue::from_json(&value), Err(StoreError::UnsupportedType(_))),
            "{} should be rejected",
            raw
        );
    }
}

// =============================================================================
// Lifecycle and integrity
// =============================================================================

#[tokio::test]
async fn test_create_over_existing() {
    let (_dir, path) = scratch("exists");
    Store::create(&path, metadata(), false).await.unwrap().close().await.unwrap();

    assert!(matches!(
        Store::create(&path, metadata(), false).await,
        Err(StoreError::AlreadyExists(_))
    ));

    let store = Store::create(&path, SlideMetadata::new("fresh", vec![2, 2]), true)
        .await
        .unwrap();
    assert_eq!(store.metadata().await.name, "fresh");
}

#[tokio::test]
async fn test_open_missing_container() {
    let (_dir, path) = scratch("nothing");
    assert!(matches!(Store::open(&path).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_open_corrupt_containers() {
    let (dir, path) = scratch("valid");
    {
        let store = Store::create(&path, metadata(), false).await.unwrap();
        store.put_tile((0, 0), tile_pixels(1), Labels::new()).await.unwrap();
        store.close().await.unwrap();
    }
    let valid = std::fs::read(&path).unwrap();

    let foreign = dir.path().join("foreign.wsit");
    std::fs::write(&foreign, b"%PDF-1.7 definitely not a container, padded out to size")
        .unwrap();

    let truncated = dir.path().join("truncated.wsit");
    std::fs::write(&truncated, &valid[..valid.len() - 10]).unwrap();

    let tampered = dir.path().join("tampered.wsit");
    let mut bytes = valid.clone();
    // last byte of the manifest, just before the footer
    let manifest_end = bytes.len() - 57;
    bytes[manifest_end] ^= 0xFF;
    std::fs::write(&tampered, &bytes).unwrap();

    let future_version = dir.path().join("version.wsit");
    let mut bytes = valid.clone();
    bytes[8] = 99;
    std::fs::write(&future_version, &bytes).unwrap();

    let empty = dir.path().join("empty.wsit");
    std::fs::write(&empty, b"").unwrap();

    for path in [foreign, truncated, tampered, future_version, empty] {
        assert!(
            matches!(Store::open(&path).await, Err(StoreError::CorruptContainer(_))),
            "{} should be corrupt",
            path.display()
        );
    }
}

#[tokio::test]
async fn test_drop_without_close_persists() {
    let (_dir, path) = scratch("dropped");
    {
        let store = Store::create(&path, metadata(), false).await.unwrap();
        store.put_tile((4, 0), tile_pixels(5), Labels::new()).await.unwrap();
        store.put_label(&Scope::Slide, "k", true).await.unwrap();
        store.append_obs(Table::new(vec!["o".into()]).unwrap()).await.unwrap();
        // dropped here
    }

    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.tile_coords().await, vec![TileCoord::from((4, 0))]);
    assert_eq!(
        store.get_label(&Scope::Slide, "k").await.unwrap(),
        LabelValue::from(true)
    );
    assert_eq!(store.get_counts().await.unwrap().obs.n_rows(), 1);
}

#[tokio::test]
async fn test_reopened_store_accepts_writes() {
    let (_dir, path) = scratch("append");
    {
        let store = Store::create(&path, metadata(), false).await.unwrap();
        store.put_tile((0, 0), tile_pixels(1), Labels::new()).await.unwrap();
        store.close().await.unwrap();
    }
    {
        let store = Store::open(&path).await.unwrap();
        store.put_tile((0, 4), tile_pixels(2), Labels::new()).await.unwrap();
        assert_eq!(
            store.get_tile(&TileCoord::from((0, 0))).await.unwrap().0,
            tile_pixels(1)
        );
        store.close().await.unwrap();
    }

    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.tile_count().await, 2);
    assert_eq!(
        store.get_tile(&TileCoord::from((0, 4))).await.unwrap().0,
        tile_pixels(2)
    );
}

#[tokio::test]
async fn test_large_tiles_read_across_blocks() {
    let (_dir, path) = scratch("large");
    let pixels = rgb_slide(300, 300, 3);
    {
        let store = Store::create(&path, SlideMetadata::new("big", vec![300, 300]), false)
            .await
            .unwrap();
        store.put_tile((0, 0), pixels.clone(), Labels::new()).await.unwrap();
        assert_eq!(store.get_tile(&TileCoord::from((0, 0))).await.unwrap().0, pixels);
        store.close().await.unwrap();
    }

    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.get_tile(&TileCoord::from((0, 0))).await.unwrap().0, pixels);
}
