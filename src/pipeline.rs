//! End-to-end indicator pipelines
//!
//! * optical: cloud/shadow mask -> MNDWI -> monthly median -> water area
//! * radar: monthly min (empty fallback) -> per-month Otsu -> water layers/area
//! * soil moisture: daily region mean -> day-of-year climatology -> anomaly
//!
//! A collaborator failure that survives the retry policy turns the affected
//! time step into a null entry instead of aborting the run.

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::IndicatorConfig;
use crate::core::area::AreaAggregator;
use crate::core::climatology::{ClimatologyAnomalyEngine, ClimatologyBaseline};
use crate::core::cloud_mask::{CloudProbabilityIndex, CloudShadowMasker};
use crate::core::compositor::{BucketTemplate, Period, Reducer, TemporalCompositor};
use crate::core::otsu::HistogramOtsuThresholder;
use crate::core::reduction::RegionReducer;
use crate::core::spectral_index::{SpectralIndexClassifier, WATER_BAND};
use crate::io::archive::{ArchiveQuery, AttributeFilter, ObservationArchive};
use crate::types::{
    AttributeValue, ClassifiedLayer, Composite, IndicatorResult, ObservationSet,
    RasterObservation, ScalarSeries, TimeBucket,
};

/// Collaborator failures become a null step; anything else is fatal
fn null_on_collaborator_failure<T>(result: IndicatorResult<T>, step: &str) -> IndicatorResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_collaborator_failure() => {
            log::warn!("Step {} has no value: {}", step, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn query_with_retry(
    archive: &dyn ObservationArchive,
    query: &ArchiveQuery,
    config: &IndicatorConfig,
) -> IndicatorResult<Option<ObservationSet>> {
    let label = format!("query {}", query.collection_id);
    null_on_collaborator_failure(config.retry.run(&label, || archive.query(query)), &label)
}

fn month_label(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m").to_string()
}

/// Series of nulls, one per monthly bucket, for runs whose query failed
fn null_monthly_series(config: &IndicatorConfig) -> IndicatorResult<ScalarSeries> {
    let mut series = ScalarSeries::new();
    for (start, _) in TemporalCompositor::bucket_bounds(config.start, config.end, Period::Months(1))? {
        series.push_monthly(start.date_naive(), None);
    }
    Ok(series)
}

/// Sentinel-2 open-water area per month
pub struct OpticalWaterPipeline<'a> {
    config: &'a IndicatorConfig,
}

impl<'a> OpticalWaterPipeline<'a> {
    pub fn new(config: &'a IndicatorConfig) -> Self {
        Self { config }
    }

    /// Masked scenes with the water index band added, ready for compositing
    pub fn prepare_scenes(
        &self,
        scenes: &[RasterObservation],
        cloud_layers: &[RasterObservation],
    ) -> IndicatorResult<Vec<RasterObservation>> {
        let optical = &self.config.optical;
        let index = CloudProbabilityIndex::from_observations(
            cloud_layers,
            &optical.cloud_mask.probability_band,
        )?;
        let masker = CloudShadowMasker::with_params(optical.cloud_mask.clone());
        let classifier = SpectralIndexClassifier::new(optical.index_name.clone());
        masker
            .mask_all(scenes, &index)?
            .iter()
            .map(|scene| {
                classifier.add_index_band(scene, (optical.green_band.as_str(), optical.swir_band.as_str()))
            })
            .collect()
    }

    /// Monthly median composites of prepared scenes
    pub fn composite(&self, prepared: &[RasterObservation]) -> IndicatorResult<Vec<TimeBucket>> {
        let optical = &self.config.optical;
        let template = BucketTemplate {
            geometry: optical.grid,
            bands: vec![
                optical.green_band.clone(),
                optical.swir_band.clone(),
                optical.cloud_mask.scl_band.clone(),
                optical.index_name.clone(),
            ],
        };
        TemporalCompositor::new(template).composite(
            prepared,
            self.config.start,
            self.config.end,
            Period::Months(1),
            Reducer::Median,
        )
    }

    /// Water area (km²) of one monthly bucket
    pub fn bucket_area(&self, bucket: &TimeBucket, reducer: &dyn RegionReducer) -> IndicatorResult<f64> {
        let optical = &self.config.optical;
        let classifier = SpectralIndexClassifier::new(optical.index_name.clone());
        let aggregator = AreaAggregator::new(optical.scale, optical.max_pixels);
        let water = match &bucket.composite {
            Composite::Real(raster) => classifier.classify_band(raster, &optical.index_name, optical.water_threshold)?,
            Composite::Empty(sentinel) => {
                log::debug!("Empty optical bucket {}: no water observed", month_label(bucket.start));
                classifier.classify_band(sentinel, &optical.index_name, optical.water_threshold)?
            }
        };
        let pixel_area = optical.pixel_area.provider();
        self.config.retry.run("optical area", || {
            aggregator.area(
                water.band(WATER_BAND)?,
                &optical.grid,
                &self.config.region,
                pixel_area.as_ref(),
                reducer,
            )
        })
    }

    pub fn run(
        &self,
        archive: &dyn ObservationArchive,
        reducer: &dyn RegionReducer,
    ) -> IndicatorResult<ScalarSeries> {
        let optical = &self.config.optical;
        log::info!("🛰️ Optical water pipeline {} .. {}", self.config.start, self.config.end);

        let scene_query = ArchiveQuery::new(
            &optical.collection,
            self.config.start,
            self.config.end,
            self.config.region.clone(),
        )
        .filter(AttributeFilter::lt("CLOUDY_PIXEL_PERCENTAGE", optical.max_cloud_percentage));
        let cloud_query = ArchiveQuery::new(
            &optical.cloud_collection,
            self.config.start,
            self.config.end,
            self.config.region.clone(),
        );

        let scenes = query_with_retry(archive, &scene_query, self.config)?;
        let clouds = query_with_retry(archive, &cloud_query, self.config)?;
        let (scenes, clouds) = match (scenes, clouds) {
            (Some(scenes), Some(clouds)) => (scenes, clouds),
            _ => return null_monthly_series(self.config),
        };

        let prepared = self.prepare_scenes(&scenes, &clouds)?;
        let buckets = self.composite(&prepared)?;

        let mut series = ScalarSeries::new();
        for bucket in &buckets {
            let label = month_label(bucket.start);
            let area = null_on_collaborator_failure(self.bucket_area(bucket, reducer), &label)?;
            series.push_monthly(bucket.start.date_naive(), area);
        }
        log::info!("✅ Optical water series complete: {} months", series.len());
        Ok(series)
    }
}

/// Sentinel-1 open-water layers per month with scene-adaptive thresholds
pub struct RadarWaterPipeline<'a> {
    config: &'a IndicatorConfig,
}

impl<'a> RadarWaterPipeline<'a> {
    pub fn new(config: &'a IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn query(&self) -> ArchiveQuery {
        let radar = &self.config.radar;
        ArchiveQuery::new(&radar.collection, self.config.start, self.config.end, self.config.region.clone())
            .filter(AttributeFilter::eq(
                "instrumentMode",
                AttributeValue::Text(radar.instrument_mode.clone()),
            ))
            .filter(AttributeFilter::eq(
                "resolution_meters",
                AttributeValue::Number(radar.resolution_meters),
            ))
            .filter(AttributeFilter::eq(
                "orbitProperties_pass",
                AttributeValue::Text(radar.orbit_pass.clone()),
            ))
            .filter(AttributeFilter::list_contains(
                "transmitterReceiverPolarisation",
                &radar.polarisation,
            ))
    }

    /// Keep only the polarisation band of each scene
    fn select_band(&self, scenes: ObservationSet) -> IndicatorResult<ObservationSet> {
        let band = &self.config.radar.otsu.band;
        scenes
            .into_iter()
            .map(|scene| {
                let grid = scene.band(band)?.clone();
                let mut selected = RasterObservation::new(scene.id, scene.timestamp).with_band(band.clone(), grid);
                selected.attributes = scene.attributes;
                Ok(selected)
            })
            .collect()
    }

    /// Monthly min composites with an empty sentinel for data-free months
    pub fn composite(&self, scenes: &[RasterObservation]) -> IndicatorResult<Vec<TimeBucket>> {
        let radar = &self.config.radar;
        let template = BucketTemplate {
            geometry: radar.grid,
            bands: vec![radar.otsu.band.clone()],
        };
        TemporalCompositor::new(template).composite(
            scenes,
            self.config.start,
            self.config.end,
            Period::Months(1),
            Reducer::Min,
        )
    }

    fn classify_bucket(&self, bucket: &TimeBucket, reducer: &dyn RegionReducer) -> IndicatorResult<ClassifiedLayer> {
        let radar = &self.config.radar;
        let thresholder = HistogramOtsuThresholder::with_params(radar.otsu.clone());
        let label = month_label(bucket.start);
        let raster = match &bucket.composite {
            Composite::Real(raster) => raster,
            Composite::Empty(sentinel) => {
                log::debug!("Empty radar bucket {}: threshold falls back", label);
                sentinel
            }
        };

        let threshold = null_on_collaborator_failure(
            self.config.retry.run("radar histogram", || {
                thresholder.threshold(raster, &radar.grid, &self.config.region, reducer)
            }),
            &label,
        )?;
        let water = match threshold {
            Some(t) => Some(thresholder.apply(raster, t)?),
            None => None,
        };
        Ok(ClassifiedLayer {
            timestamp: bucket.start,
            label,
            water,
            threshold,
            empty: bucket.composite.is_empty(),
        })
    }

    /// Classified water layers, one per month, in chronological order
    pub fn run(
        &self,
        archive: &dyn ObservationArchive,
        reducer: &dyn RegionReducer,
    ) -> IndicatorResult<Vec<ClassifiedLayer>> {
        log::info!("📡 Radar water pipeline {} .. {}", self.config.start, self.config.end);
        let scenes = match query_with_retry(archive, &self.query(), self.config)? {
            Some(scenes) => self.select_band(scenes)?,
            None => {
                return Ok(TemporalCompositor::bucket_bounds(self.config.start, self.config.end, Period::Months(1))?
                    .into_iter()
                    .map(|(start, _)| ClassifiedLayer {
                        timestamp: start,
                        label: month_label(start),
                        water: None,
                        threshold: None,
                        empty: false,
                    })
                    .collect())
            }
        };
        let buckets = self.composite(&scenes)?;

        #[cfg(feature = "parallel")]
        let layers: IndicatorResult<Vec<ClassifiedLayer>> = {
            use rayon::prelude::*;
            buckets.par_iter().map(|b| self.classify_bucket(b, reducer)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let layers: IndicatorResult<Vec<ClassifiedLayer>> =
            buckets.iter().map(|b| self.classify_bucket(b, reducer)).collect();

        let layers = layers?;
        let fallbacks = layers
            .iter()
            .filter(|l| l.threshold.map_or(false, |t| t.is_fallback()))
            .count();
        log::info!("✅ Radar water layers complete: {} months, {} fallback thresholds", layers.len(), fallbacks);
        Ok(layers)
    }

    /// Water area (km²) of each classified layer; null layers stay null
    pub fn area_series(
        &self,
        layers: &[ClassifiedLayer],
        reducer: &dyn RegionReducer,
    ) -> IndicatorResult<ScalarSeries> {
        let radar = &self.config.radar;
        let aggregator = AreaAggregator::new(radar.area_scale, radar.max_pixels);
        let pixel_area = radar.pixel_area.provider();
        let mut series = ScalarSeries::new();
        for layer in layers {
            let area = match &layer.water {
                Some(water) => {
                    let result = self.config.retry.run("radar area", || {
                        aggregator.area(
                            water.band(WATER_BAND)?,
                            &radar.grid,
                            &self.config.region,
                            pixel_area.as_ref(),
                            reducer,
                        )
                    });
                    null_on_collaborator_failure(result, &layer.label)?
                }
                None => None,
            };
            series.push_monthly(layer.timestamp.date_naive(), area);
        }
        Ok(series)
    }
}

/// SMAP daily soil moisture and its day-of-year anomaly
#[derive(Debug, Clone)]
pub struct SoilMoistureSeries {
    pub daily: ScalarSeries,
    pub baseline: ClimatologyBaseline,
    pub anomaly: ScalarSeries,
    /// The archive query failed after retries; all three parts are empty
    pub unavailable: bool,
}

pub struct SoilMoisturePipeline<'a> {
    config: &'a IndicatorConfig,
}

impl<'a> SoilMoisturePipeline<'a> {
    pub fn new(config: &'a IndicatorConfig) -> Self {
        Self { config }
    }

    fn history_start(&self) -> DateTime<Utc> {
        let date: NaiveDate = self.config.soil_moisture.history_start;
        date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
    }

    /// Region-mean value of each observation, in timestamp order
    pub fn daily_series(
        &self,
        observations: &[RasterObservation],
        reducer: &dyn RegionReducer,
    ) -> IndicatorResult<ScalarSeries> {
        let soil = &self.config.soil_moisture;
        let mut ordered: Vec<&RasterObservation> = observations.iter().collect();
        ordered.sort_by_key(|o| o.timestamp);

        let mut series = ScalarSeries::new();
        for obs in ordered {
            let date = obs.timestamp.date_naive();
            let grid = obs.band(&soil.band)?;
            let mean = self.config.retry.run("soil moisture mean", || {
                reducer.reduce_mean(grid, &soil.grid, &self.config.region, soil.scale)
            });
            let value = null_on_collaborator_failure(mean, &date.to_string())?.flatten();
            series.push_daily(date, value);
        }
        Ok(series)
    }

    pub fn run(
        &self,
        archive: &dyn ObservationArchive,
        reducer: &dyn RegionReducer,
    ) -> IndicatorResult<SoilMoistureSeries> {
        let soil = &self.config.soil_moisture;
        log::info!("💧 Soil moisture pipeline {} .. {}", soil.history_start, self.config.end);
        let query = ArchiveQuery::new(
            &soil.collection,
            self.history_start(),
            self.config.end,
            self.config.region.clone(),
        );
        let (observations, unavailable) = match query_with_retry(archive, &query, self.config)? {
            Some(observations) => (observations, false),
            None => {
                log::error!("❌ No soil moisture data: {} query failed, series is missing", soil.collection);
                (Vec::new(), true)
            }
        };
        let daily = self.daily_series(&observations, reducer)?;

        let engine = ClimatologyAnomalyEngine::with_policy(soil.leap_day_policy);
        let baseline = engine.build_baseline(&daily, soil.baseline_start, soil.baseline_end);
        let anomaly = engine.anomaly(&daily, &baseline);
        log::info!("✅ Soil moisture anomaly series complete: {} days", anomaly.len());
        Ok(SoilMoistureSeries {
            daily,
            baseline,
            anomaly,
            unavailable,
        })
    }
}
