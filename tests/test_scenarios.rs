use approx::assert_abs_diff_eq;
use chrono::{NaiveDate, TimeZone, Utc};
use lakewatch::core::{
    AreaAggregator, BucketTemplate, ClimatologyAnomalyEngine, CloudProbabilityIndex, CloudShadowMasker,
    GridReducer, HistogramOtsuThresholder, Period, Reducer, Region, SpectralIndexClassifier,
    TemporalCompositor, UniformPixelArea, WATER_BAND,
};
use lakewatch::types::{
    BoundingBox, GeoTransform, GridGeometry, Histogram, MaskedGrid, RasterObservation, ScalarSeries,
    Threshold,
};
use ndarray::{array, Array2};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn geometry() -> GridGeometry {
    GridGeometry {
        rows: 2,
        cols: 2,
        geo_transform: GeoTransform {
            top_left_x: 0.0,
            pixel_width: 1.0,
            top_left_y: 2.0,
            pixel_height: -1.0,
        },
        native_scale: 10.0,
    }
}

fn region() -> Region {
    Region::from_bounds(BoundingBox {
        min_lon: 0.0,
        max_lon: 2.0,
        min_lat: 0.0,
        max_lat: 2.0,
    })
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn test_scenario_a_leap_day_baseline() {
    init_logging();
    let mut base = ScalarSeries::new();
    base.push_daily(date(2016, 1, 1), Some(10.0));
    base.push_daily(date(2016, 12, 31), Some(20.0)); // day 366 of a leap year

    let engine = ClimatologyAnomalyEngine::new();
    let baseline = engine.build_baseline(&base, date(2016, 1, 1), date(2016, 12, 31));
    assert_eq!(baseline.len(), 2);
    assert_eq!(baseline.get(1), Some(10.0));
    assert_eq!(baseline.get(366), Some(20.0));
    assert_eq!(baseline.get(365), None);

    let mut target = ScalarSeries::new();
    target.push_daily(date(2017, 1, 1), Some(15.0));
    let anomaly = engine.anomaly(&target, &baseline);
    assert_abs_diff_eq!(anomaly.points[0].value.expect("anomaly computed"), 5.0);
}

#[test]
fn test_scenario_b_two_months_one_empty() {
    init_logging();
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let scenes: Vec<RasterObservation> = [(5, 1.0f32), (12, 3.0), (20, 2.0)]
        .iter()
        .map(|&(day, v)| {
            RasterObservation::new(format!("jan{}", day), Utc.with_ymd_and_hms(2025, 1, day, 10, 0, 0).unwrap())
                .with_band("B3", MaskedGrid::from_values(Array2::from_elem((2, 2), v)))
        })
        .collect();

    let compositor = TemporalCompositor::new(BucketTemplate {
        geometry: geometry(),
        bands: vec!["B3".to_string()],
    });
    let buckets = compositor
        .composite(&scenes, start, end, Period::Months(1), Reducer::Median)
        .expect("Failed to composite");

    assert_eq!(buckets.len(), 2);
    assert!(!buckets[0].composite.is_empty());
    assert_eq!(buckets[0].contributors, 3);
    assert_eq!(buckets[0].composite.raster().band("B3").unwrap().get(1, 1), Some(2.0));

    assert!(buckets[1].composite.is_empty());
    assert!(buckets[1].composite.raster().is_empty_sentinel());
    assert_eq!(
        buckets[1].composite.raster().timestamp,
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_scenario_c_uniform_histogram_midpoint() {
    let hist = Histogram::new(vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 1.0, 1.0, 1.0]).unwrap();
    let threshold = HistogramOtsuThresholder::new().threshold_from_histogram(&hist);
    assert_eq!(threshold, Threshold::Value(1.0));
}

#[test]
fn test_bucket_count_is_independent_of_data() {
    let compositor = TemporalCompositor::new(BucketTemplate {
        geometry: geometry(),
        bands: vec!["VV".to_string()],
    });
    let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
    let one_scene = vec![RasterObservation::new("x", Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
        .with_band("VV", MaskedGrid::from_values(Array2::zeros((2, 2))))];

    for observations in [Vec::new(), one_scene] {
        let buckets = compositor
            .composite(&observations, start, end, Period::Months(1), Reducer::Min)
            .unwrap();
        assert_eq!(buckets.len(), 12);
    }
}

#[test]
fn test_empty_sentinel_yields_zero_area_and_fallback_threshold() {
    init_logging();
    let start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let compositor = TemporalCompositor::new(BucketTemplate {
        geometry: geometry(),
        bands: vec!["VV".to_string(), "MNDWI".to_string()],
    });
    let buckets = compositor.composite(&[], start, end, Period::Months(1), Reducer::Min).unwrap();
    let sentinel = buckets[0].composite.raster();

    let water = SpectralIndexClassifier::mndwi()
        .classify_band(sentinel, "MNDWI", 0.0)
        .unwrap();
    let km2 = AreaAggregator::new(10.0, 1_000)
        .area(
            water.band(WATER_BAND).unwrap(),
            &geometry(),
            &region(),
            &UniformPixelArea { cell_size_m: 10.0 },
            &GridReducer::default(),
        )
        .unwrap();
    assert_eq!(km2, 0.0);

    let threshold = HistogramOtsuThresholder::new()
        .threshold(sentinel, &geometry(), &region(), &GridReducer::default())
        .unwrap();
    assert_eq!(threshold, Threshold::Fallback(0.05));
}

#[test]
fn test_two_value_histogram_and_symmetric_ties() {
    let two_values = Histogram::new(vec![0.02, 0.04, 0.08, 0.16], vec![0.0, 25.0, 0.0, 75.0]).unwrap();
    assert_eq!(
        HistogramOtsuThresholder::new().threshold_from_histogram(&two_values),
        Threshold::Value(0.04)
    );

    let symmetric = Histogram::new(vec![-1.0, 0.0, 1.0], vec![5.0, 0.0, 5.0]).unwrap();
    assert_eq!(
        HistogramOtsuThresholder::new().threshold_from_histogram(&symmetric),
        Threshold::Value(-1.0)
    );
}

#[test]
fn test_zero_denominator_cell_is_invalid() {
    let obs = RasterObservation::new("z", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        .with_band("B3", MaskedGrid::from_values(array![[0.0, 0.4]]))
        .with_band("B11", MaskedGrid::from_values(array![[0.0, 0.1]]));
    let water = SpectralIndexClassifier::mndwi()
        .classify(&obs, ("B3", "B11"), -1.0)
        .unwrap();
    let band = water.band(WATER_BAND).unwrap();
    assert_eq!(band.get(0, 0), None);
    assert_eq!(band.get(0, 1), Some(1.0));
}

#[test]
fn test_clear_sky_masking_is_identity() {
    let values = array![[0.12, 0.3], [0.05, 0.2]];
    let validity = array![[true, false], [true, true]];
    let obs = RasterObservation::new("S2_CLEAR", Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).unwrap())
        .with_band("B3", MaskedGrid::new(values.clone(), validity.clone()).unwrap())
        .with_band("B11", MaskedGrid::new(values * 0.5, validity).unwrap())
        .with_band("SCL", MaskedGrid::from_values(array![[4.0, 5.0], [6.0, 4.0]]));
    let mut index = CloudProbabilityIndex::new();
    index.insert("S2_CLEAR", MaskedGrid::from_values(array![[0.0, 12.0], [39.0, 40.0]]));

    let masked = CloudShadowMasker::new().mask(&obs, &index).unwrap();
    assert_eq!(masked, obs);
}
