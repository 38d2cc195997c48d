//! Pipeline engine tests over decoder-backed slides.

use std::sync::Arc;

use wsi_tilestore::array::{DType, NdArray};
use wsi_tilestore::error::{PipelineError, SlideError, StoreError};
use wsi_tilestore::pipeline::{
    from_fn, Pipeline, PipelineEngine, Scheduling, TokioWorkerPool, Transform,
};
use wsi_tilestore::slide::{Decoder, Slide, SlideOptions};
use wsi_tilestore::store::{Column, Store};
use wsi_tilestore::tile::{Region, Tile, TileCoord};

use super::test_utils::{
    assert_same_contents, count_rows, describe, fail_at, rgb_slide, scratch, shift_by_content,
    threshold_mask, CountingDecoder,
};

fn full_pipeline() -> Pipeline {
    Pipeline::named("full")
        .with(shift_by_content())
        .with(describe())
        .with(threshold_mask(128))
        .with(count_rows())
}

fn overlapping_options() -> SlideOptions {
    SlideOptions::new(8).with_stride(6).with_padding(true)
}

// =============================================================================
// Scheduling equivalence
// =============================================================================

#[tokio::test]
async fn test_local_and_distributed_are_identical() {
    let pixels = rgb_slide(30, 26, 3);

    let (_local_dir, local_path) = scratch("local");
    let local = Slide::create(
        &local_path,
        "s",
        CountingDecoder::new(pixels.clone(), 2),
        overlapping_options(),
    )
    .await
    .unwrap();
    local.run(full_pipeline(), Scheduling::Local).await.unwrap();
    local.close().await.unwrap();

    for workers in [1, 3, 8] {
        let (_dir, path) = scratch("distributed");
        let slide = Slide::create(
            &path,
            "s",
            CountingDecoder::new(pixels.clone(), 2),
            overlapping_options(),
        )
        .await
        .unwrap();

        let pool = TokioWorkerPool::start(workers);
        let engine = PipelineEngine::new(full_pipeline()).with_max_in_flight(workers * 2);
        slide
            .run_with(&engine, Scheduling::Distributed(&pool))
            .await
            .unwrap();
        pool.shutdown().await;
        slide.close().await.unwrap();

        let a = Store::open(&local_path).await.unwrap();
        let b = Store::open(&path).await.unwrap();
        assert_same_contents(&a, &b).await;
    }
}

#[tokio::test]
async fn test_each_tile_is_read_once() {
    let (_dir, path) = scratch("reads");
    let decoder = Arc::new(CountingDecoder::new(rgb_slide(20, 20, 3), 2));
    let slide = Slide::create_shared(&path, "s", decoder.clone(), overlapping_options())
        .await
        .unwrap();

    let pool = TokioWorkerPool::start(4);
    let summary = slide
        .run(full_pipeline(), Scheduling::Distributed(&pool))
        .await
        .unwrap();
    pool.shutdown().await;

    let tiles = slide.grid().unwrap().len();
    assert_eq!(summary.tiles_committed, tiles);
    assert_eq!(decoder.reads(), tiles);
}

// =============================================================================
// Overlap determinism
// =============================================================================

/// What the tile at `origin` holds after `shift_by_content`, computed from
/// the source pixels alone.
fn shifted_tile(pixels: &NdArray, origin: (usize, usize), tile: usize) -> NdArray {
    let (row, col) = origin;
    let size = [
        tile.min(pixels.shape()[0] - row),
        tile.min(pixels.shape()[1] - col),
    ];
    let raw = pixels
        .crop(&[row, col], &size)
        .unwrap()
        .pad_to(&[tile, tile])
        .unwrap();
    let mut expected = Tile::new(origin, raw);
    shift_by_content().apply(&mut expected).unwrap();
    expected.image
}

async fn check_overlap(pixels: &NdArray, options: impl Fn() -> SlideOptions, last: usize) {
    let mut canvases = Vec::new();
    for _ in 0..3 {
        let (_dir, path) = scratch("overlap");
        let slide = Slide::create(&path, "s", CountingDecoder::new(pixels.clone(), 2), options())
            .await
            .unwrap();
        slide.run(shift_by_content(), Scheduling::Local).await.unwrap();
        canvases.push(slide.stitch_all().await.unwrap());

        // The last tile overwrites everything under it, up to the slide edge.
        let visible = pixels.shape()[0] - last;
        let window = slide
            .stitch(Region::new(vec![last, last], vec![visible, visible]))
            .await
            .unwrap();
        let expected = shifted_tile(pixels, (last, last), 4)
            .crop(&[0, 0], &[visible, visible])
            .unwrap();
        assert_eq!(window, expected);

        // No later tile reaches the top-left 3x3 of the tile before it.
        let middle = last - 3;
        let window = slide
            .stitch(Region::new(vec![middle, middle], vec![3, 3]))
            .await
            .unwrap();
        let expected = shifted_tile(pixels, (middle, middle), 4)
            .crop(&[0, 0], &[3, 3])
            .unwrap();
        assert_eq!(window, expected);
    }

    assert_eq!(canvases[0], canvases[1]);
    assert_eq!(canvases[1], canvases[2]);
}

#[tokio::test]
async fn test_overlap_is_deterministic() {
    // Origins 0, 3, 6 per axis.
    check_overlap(&rgb_slide(10, 10, 3), || SlideOptions::new(4).with_stride(3), 6).await;
}

#[tokio::test]
async fn test_padded_overlap_is_deterministic() {
    // Origins 0, 3, 6, 9 per axis; the last row and column of tiles are padded.
    check_overlap(
        &rgb_slide(11, 11, 3),
        || SlideOptions::new(4).with_stride(3).with_padding(true),
        9,
    )
    .await;
}

// =============================================================================
// Dtype-changing transforms
// =============================================================================

fn to_f32() -> impl Transform {
    from_fn("to_f32", |tile: &mut Tile| {
        let values: Vec<f32> = tile
            .image
            .to_vec::<u8>()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(f32::from)
            .collect();
        tile.image = NdArray::from_vec(tile.image.shape().to_vec(), values)
            .map_err(|e| e.to_string())?;
        Ok(())
    })
}

#[tokio::test]
async fn test_transform_may_change_dtype() {
    let pixels = rgb_slide(8, 8, 3);
    let expected = NdArray::from_vec(
        vec![8, 8, 3],
        pixels
            .to_vec::<u8>()
            .unwrap()
            .into_iter()
            .map(f32::from)
            .collect::<Vec<f32>>(),
    )
    .unwrap();

    let pool = TokioWorkerPool::start(2);
    for distributed in [false, true] {
        let (_dir, path) = scratch("f32");
        let slide = Slide::create(
            &path,
            "s",
            CountingDecoder::new(pixels.clone(), 2),
            SlideOptions::new(4),
        )
        .await
        .unwrap();

        let scheduling = if distributed {
            Scheduling::Distributed(&pool)
        } else {
            Scheduling::Local
        };
        let summary = slide.run(to_f32(), scheduling).await.unwrap();
        assert_eq!(summary.tiles_committed, 4);
        assert_eq!(slide.store().tile_count().await, 4);

        let schema = slide.store().metadata().await.tile_schema.unwrap();
        assert_eq!(schema.dtype, DType::F32);
        assert_eq!(schema.tile_shape, vec![4, 4, 3]);
        assert_eq!(slide.stitch_all().await.unwrap(), expected);
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn test_declared_schema_rejects_other_dtype() {
    let (_dir, path) = scratch("declared");
    let slide = Slide::create(
        &path,
        "s",
        CountingDecoder::new(rgb_slide(8, 8, 3), 2),
        SlideOptions::new(4).with_declared_schema(true),
    )
    .await
    .unwrap();

    let err = slide.run(to_f32(), Scheduling::Local).await.unwrap_err();
    assert!(matches!(
        err,
        SlideError::Pipeline(PipelineError::Store(StoreError::ShapeMismatch { .. }))
    ));
    assert_eq!(slide.store().tile_count().await, 0);
}

// =============================================================================
// Failure
// =============================================================================

async fn run_failing(scheduling: Scheduling<'_>, path: &std::path::Path) -> SlideError {
    // 6 x 6 grid of 2 x 2 tiles
    let slide = Slide::create(
        path,
        "s",
        CountingDecoder::new(rgb_slide(12, 12, 3), 2),
        SlideOptions::new(2),
    )
    .await
    .unwrap();
    let pipeline = Pipeline::new().with(describe()).with(fail_at((4, 6)));
    let err = slide.run(pipeline, scheduling).await.unwrap_err();
    slide.close().await.unwrap();
    err
}

#[tokio::test]
async fn test_failure_leaves_enumeration_prefix() {
    let (_dir, path) = scratch("fail-local");
    let local_err = run_failing(Scheduling::Local, &path).await;
    let local = Store::open(&path).await.unwrap();

    // (4, 6) is grid position (2, 3): index 2 * 6 + 3
    let expected: Vec<TileCoord> = (0..15)
        .map(|i| TileCoord::from(((i / 6) * 2, (i % 6) * 2)))
        .collect();
    assert_eq!(local.tile_coords().await, expected);
    assert!(!local.contains_tile(&TileCoord::from((4, 6))).await);
    match local_err {
        SlideError::Pipeline(PipelineError::Transform { coord, source }) => {
            assert_eq!(coord, TileCoord::from((4, 6)));
            assert_eq!(source.transform, "fail");
        }
        other => panic!("unexpected error: {}", other),
    }

    let (_dir, path) = scratch("fail-distributed");
    let pool = TokioWorkerPool::start(4);
    let dist_err = run_failing(Scheduling::Distributed(&pool), &path).await;
    pool.shutdown().await;
    assert!(matches!(
        dist_err,
        SlideError::Pipeline(PipelineError::Transform { .. })
    ));

    let distributed = Store::open(&path).await.unwrap();
    assert_same_contents(&local, &distributed).await;
}

#[tokio::test]
async fn test_decode_failure_aborts_run() {
    struct Broken(CountingDecoder);

    #[async_trait::async_trait]
    impl Decoder for Broken {
        fn shape(&self) -> &[usize] {
            self.0.shape()
        }
        fn trailing_dims(&self) -> &[usize] {
            self.0.trailing_dims()
        }
        fn dtype(&self) -> DType {
            self.0.dtype()
        }
        async fn read_region(
            &self,
            region: &Region,
            level: usize,
        ) -> Result<NdArray, wsi_tilestore::error::DecodeError> {
            if region.origin == [2, 2] {
                return Err(wsi_tilestore::error::DecodeError::Image("bad block".into()));
            }
            self.0.read_region(region, level).await
        }
    }

    let (_dir, path) = scratch("broken");
    let slide = Slide::create(
        &path,
        "s",
        Broken(CountingDecoder::new(rgb_slide(4, 4, 3), 2)),
        SlideOptions::new(2),
    )
    .await
    .unwrap();
    let err = slide.ingest(Scheduling::Local).await.unwrap_err();
    assert!(matches!(
        err,
        SlideError::Pipeline(PipelineError::Decode { ref coord, .. }) if *coord == TileCoord::from((2, 2))
    ));
    assert_eq!(slide.store().tile_count().await, 3);
}

// =============================================================================
// Re-running over a container
// =============================================================================

#[tokio::test]
async fn test_rerun_over_reopened_container() {
    let (_dir, path) = scratch("rerun");
    {
        let slide = Slide::create(
            &path,
            "s",
            CountingDecoder::new(rgb_slide(8, 8, 3), 2),
            SlideOptions::new(4),
        )
        .await
        .unwrap();
        slide.run(threshold_mask(100), Scheduling::Local).await.unwrap();
        slide.close().await.unwrap();
    }

    let slide = Slide::open(&path).await.unwrap();
    let before = slide.stitch_all().await.unwrap();
    slide
        .run(Pipeline::named("rerun").with(describe()), Scheduling::Local)
        .await
        .unwrap();

    // Pixels and masks survive; labels are added.
    assert_eq!(slide.stitch_all().await.unwrap(), before);
    for coord in slide.store().tile_coords().await {
        let tile = slide.store().load_tile(&coord).await.unwrap();
        assert_eq!(tile.masks.keys(), vec!["bright"]);
        assert!(tile.labels.contains("mean"));
    }
}

#[tokio::test]
async fn test_counts_follow_commit_order() {
    let (_dir, path) = scratch("counts");
    let slide = Slide::create(
        &path,
        "s",
        CountingDecoder::new(rgb_slide(9, 9, 3), 2),
        SlideOptions::new(3),
    )
    .await
    .unwrap();

    let pool = TokioWorkerPool::start(3);
    slide
        .run(count_rows(), Scheduling::Distributed(&pool))
        .await
        .unwrap();
    pool.shutdown().await;

    let counts = slide.store().get_counts().await.unwrap();
    let ids: Vec<String> = slide
        .store()
        .tile_coords()
        .await
        .iter()
        .map(|c| c.to_string())
        .collect();
    assert_eq!(counts.obs.index(), ids.as_slice());
    assert!(matches!(counts.obs.column("sum"), Some(Column::Int(v)) if v.len() == 9));

    // Running again replaces each tile's rows instead of repeating them.
    slide.run(count_rows(), Scheduling::Local).await.unwrap();
    assert_eq!(slide.store().get_counts().await.unwrap(), counts);

    let pool = TokioWorkerPool::start(2);
    slide
        .run(count_rows(), Scheduling::Distributed(&pool))
        .await
        .unwrap();
    pool.shutdown().await;
    let again = slide.store().get_counts().await.unwrap();
    assert_eq!(again.obs.n_rows(), 9);
    assert_eq!(again, counts);
}

#[tokio::test]
async fn test_cancelled_engine_commits_nothing() {
    let (_dir, path) = scratch("cancel");
    let slide = Slide::create(
        &path,
        "s",
        CountingDecoder::new(rgb_slide(8, 8, 3), 2),
        SlideOptions::new(4),
    )
    .await
    .unwrap();

    let engine = PipelineEngine::new(Pipeline::new());
    engine.cancellation_token().cancel();

    let pool = TokioWorkerPool::start(2);
    let err = slide
        .run_with(&engine, Scheduling::Distributed(&pool))
        .await
        .unwrap_err();
    pool.shutdown().await;

    assert!(matches!(err, SlideError::Pipeline(PipelineError::Cancelled)));
    assert_eq!(slide.store().tile_count().await, 0);
}
