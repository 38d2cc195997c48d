//! Slide lifecycle tests, from image file to stitched export.

use image::{ImageFormat, Rgb, RgbImage};

use wsi_tilestore::array::{DType, NdArray};
use wsi_tilestore::error::{DecodeError, SlideError, StoreError};
use wsi_tilestore::pipeline::{Scheduling, TokioWorkerPool};
use wsi_tilestore::slide::{encode_png, ArrayDecoder, Decoder, ImageDecoder, Slide, SlideOptions};
use wsi_tilestore::store::{LabelValue, Labels};
use wsi_tilestore::tile::{Region, TileCoord};

use super::test_utils::{gray_slide, rgb_slide, scratch, threshold_mask};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 8 % 256) as u8, (y * 8 % 256) as u8, ((x + y) % 256) as u8])
    })
}

// =============================================================================
// Image files
// =============================================================================

#[tokio::test]
async fn test_png_end_to_end() {
    let (dir, path) = scratch("png");
    let source = dir.path().join("source.png");
    let image = gradient(30, 20);
    image.save_with_format(&source, ImageFormat::Png).unwrap();

    let decoder = ImageDecoder::open(&source).await.unwrap();
    let slide = Slide::create(
        &path,
        "gradient",
        decoder,
        SlideOptions::new(16).with_padding(true),
    )
    .await
    .unwrap();
    assert_eq!(slide.shape().await, vec![20, 30]);
    assert_eq!(slide.grid().unwrap().len(), 4);

    let pool = TokioWorkerPool::start(2);
    let summary = slide.ingest(Scheduling::Distributed(&pool)).await.unwrap();
    pool.shutdown().await;
    assert_eq!(summary.tiles_committed, 4);

    // Edge tiles are stored padded to the full tile size.
    let (edge, _) = slide
        .store()
        .get_tile(&TileCoord::from((16, 16)))
        .await
        .unwrap();
    assert_eq!(edge.shape(), &[16, 16, 3]);

    let expected = NdArray::new(DType::U8, vec![20, 30, 3], image.clone().into_raw()).unwrap();
    let stitched = slide.stitch_all().await.unwrap();
    assert_eq!(stitched, expected);

    // Export and decode again.
    let png = encode_png(&stitched).unwrap();
    let round = ImageDecoder::from_bytes(&png).unwrap();
    let decoded = round
        .read_region(&Region::full(&[20, 30]), 0)
        .await
        .unwrap();
    assert_eq!(decoded, expected);
    slide.close().await.unwrap();
}

#[tokio::test]
async fn test_open_missing_image() {
    let dir = tempfile::tempdir().unwrap();
    let err = ImageDecoder::open(dir.path().join("absent.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, DecodeError::Io(_)));
}

#[tokio::test]
async fn test_stitched_window_matches_source() {
    let (_dir, path) = scratch("window");
    let pixels = gray_slide(13, 11);
    let slide = Slide::create(
        &path,
        "gray",
        ArrayDecoder::new(pixels.clone(), 2).unwrap(),
        SlideOptions::new(4).with_padding(true),
    )
    .await
    .unwrap();
    slide.ingest(Scheduling::Local).await.unwrap();

    let window = slide
        .stitch(Region::new(vec![5, 3], vec![6, 7]))
        .await
        .unwrap();
    assert_eq!(window, pixels.crop(&[5, 3], &[6, 7]).unwrap());

    // Parts of the window outside the slide are zero.
    let outside = slide
        .stitch(Region::new(vec![10, 8], vec![6, 6]))
        .await
        .unwrap();
    let values = outside.to_vec::<u16>().unwrap();
    assert_eq!(values[0], (10 * 11 + 8) as u16);
    assert_eq!(values[5], 0);
    assert_eq!(values[35], 0);
}

// =============================================================================
// Options
// =============================================================================

#[tokio::test]
async fn test_options_are_recorded() {
    let (_dir, path) = scratch("options");
    let mut labels = Labels::new();
    labels.insert("stain", "H&E").unwrap();
    labels.insert("mpp", 0.25).unwrap();

    let slide = Slide::create(
        &path,
        "opts",
        ArrayDecoder::new(rgb_slide(12, 12, 4), 2).unwrap(),
        SlideOptions::new(6).with_stride(3).with_labels(labels),
    )
    .await
    .unwrap();

    let grid = slide.grid().unwrap();
    assert_eq!(grid.stride(), &[3, 3]);
    assert_eq!(grid.len(), 9);

    slide.put_label("stain", "PAS").await.unwrap();
    let labels = slide.labels().await.unwrap();
    assert_eq!(labels.keys(), vec!["stain", "mpp"]);
    assert_eq!(labels.get("stain"), Some(&LabelValue::from("PAS")));

    // The first committed tile fixes the schema.
    assert!(slide.store().metadata().await.tile_schema.is_none());
    slide.ingest(Scheduling::Local).await.unwrap();
    let schema = slide.store().metadata().await.tile_schema.unwrap();
    assert_eq!(schema.tile_shape, vec![6, 6, 4]);
    assert_eq!(schema.dtype, DType::U8);
}

#[tokio::test]
async fn test_invalid_options() {
    let (_dir, path) = scratch("invalid");
    let decoder = || ArrayDecoder::new(rgb_slide(8, 8, 3), 2).unwrap();

    let err = Slide::create(&path, "s", decoder(), SlideOptions::new(0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SlideError::Grid(_)));

    let err = Slide::create(&path, "s", decoder(), SlideOptions::new(4).with_level(2))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SlideError::Decode(DecodeError::InvalidLevel { level: 2, count: 1 })
    ));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_create_refuses_existing_container() {
    let (_dir, path) = scratch("exists");
    let decoder = || ArrayDecoder::new(rgb_slide(8, 8, 3), 2).unwrap();

    let slide = Slide::create(&path, "first", decoder(), SlideOptions::new(4))
        .await
        .unwrap();
    slide.ingest(Scheduling::Local).await.unwrap();
    slide.close().await.unwrap();

    let err = Slide::create(&path, "second", decoder(), SlideOptions::new(4))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SlideError::Store(StoreError::AlreadyExists(_))));

    let slide = Slide::create(
        &path,
        "second",
        decoder(),
        SlideOptions::new(4).with_overwrite(true),
    )
    .await
    .unwrap();
    assert_eq!(slide.name().await, "second");
    assert_eq!(slide.store().tile_count().await, 0);
}

#[tokio::test]
async fn test_lower_resolution_level() {
    let (_dir, path) = scratch("level");
    let decoder = ArrayDecoder::new(rgb_slide(16, 16, 3), 2)
        .unwrap()
        .with_level(rgb_slide(8, 8, 3))
        .unwrap();

    let slide = Slide::create(&path, "s", decoder, SlideOptions::new(4).with_level(1))
        .await
        .unwrap();
    assert_eq!(slide.shape().await, vec![8, 8]);
    slide.ingest(Scheduling::Local).await.unwrap();
    assert_eq!(slide.stitch_all().await.unwrap(), rgb_slide(8, 8, 3));
}

// =============================================================================
// Masks and reopening
// =============================================================================

#[tokio::test]
async fn test_masks_survive_reopen() {
    let (_dir, path) = scratch("reopen");
    {
        let slide = Slide::create(
            &path,
            "s",
            ArrayDecoder::new(rgb_slide(8, 8, 3), 2).unwrap(),
            SlideOptions::new(4),
        )
        .await
        .unwrap();
        slide.run(threshold_mask(50), Scheduling::Local).await.unwrap();

        let tissue = NdArray::from_vec(vec![8, 8], vec![1u8; 64]).unwrap();
        slide.masks().add("tissue", tissue).await.unwrap();
        slide.close().await.unwrap();
    }

    let slide = Slide::open(&path).await.unwrap();
    assert!(slide.grid().is_none());
    assert_eq!(slide.masks().keys().await.unwrap(), vec!["tissue"]);
    let bright = slide.tile_masks((4, 4)).get("bright").await.unwrap();
    assert_eq!(bright.shape(), &[4, 4]);
    assert_eq!(slide.stitch_all().await.unwrap(), rgb_slide(8, 8, 3));
}

#[tokio::test]
async fn test_stitch_without_tiles() {
    let (_dir, path) = scratch("empty");
    let store = wsi_tilestore::store::Store::create(
        &path,
        wsi_tilestore::store::SlideMetadata::new("empty", vec![4, 4]),
        false,
    )
    .await
    .unwrap();
    store.close().await.unwrap();

    let slide = Slide::open(&path).await.unwrap();
    assert!(matches!(
        slide.stitch_all().await,
        Err(SlideError::Store(StoreError::NotFound(_)))
    ));
    assert!(matches!(
        slide.stitch(Region::new(vec![0], vec![2])).await,
        Err(SlideError::Store(StoreError::NotFound(_)))
    ));
}
