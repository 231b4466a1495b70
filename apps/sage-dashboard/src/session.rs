use anyhow::{Context, Result};

use crate::auth::verify_password;
use crate::cache::{ImageQueryKey, QueryKey, ResultCache};
use crate::catalog::{environment_parameter, RainParameter};
use crate::chart::{
    environment_chart, image_gallery, rain_chart, EnvironmentChart, ImageGallery, RainChart,
};
use crate::config::Config;
use crate::error::{QueryError, SessionError};
use crate::images::{fetch_all, HttpImageFetcher, ImageFetcher, ImageOutcome, ImageRecord};
use crate::query::{DataClient, ImageQuery, QueryFilter, TelemetrySource};
use crate::series::TelemetrySeries;
use crate::time_window::TimeWindow;

pub struct ImageBatch {
    pub gallery: ImageGallery,
    pub outcomes: Vec<ImageOutcome>,
}

/// Everything one operator session owns: the data sources, the password gate state,
/// the memoized query results and the most recently displayed series.
///
/// Created when the session starts; [`Session::end`] drops all of it.
pub struct Session {
    source: Box<dyn TelemetrySource>,
    fetcher: Box<dyn ImageFetcher + Send>,
    image_workers: usize,
    password_hash: Option<String>,
    authenticated: bool,
    series_cache: ResultCache<QueryKey, TelemetrySeries>,
    image_cache: ResultCache<ImageQueryKey, Vec<ImageRecord>>,
    last_series: Option<TelemetrySeries>,
}

impl Session {
    pub fn new(
        source: Box<dyn TelemetrySource>,
        fetcher: Box<dyn ImageFetcher + Send>,
        image_workers: usize,
        password_hash: Option<String>,
    ) -> Self {
        Self {
            source,
            fetcher,
            image_workers: image_workers.max(1),
            password_hash,
            authenticated: false,
            series_cache: ResultCache::new(),
            image_cache: ResultCache::new(),
            last_series: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let source = DataClient::new(
            config.query_url.clone(),
            config.query_timeout,
            &config.user_agent,
        )
        .context("failed to build telemetry client")?;
        let fetcher = HttpImageFetcher::new(
            config.image_timeout,
            &config.user_agent,
            config.secrets.image_credentials.clone(),
        )
        .context("failed to build image client")?;
        Ok(Self::new(
            Box::new(source),
            Box::new(fetcher),
            config.image_workers,
            config.secrets.password_hash.clone(),
        ))
    }

    /// Unlocks the image page. With no stored hash the gate stays shut.
    pub fn authenticate(&mut self, password: &str) -> bool {
        let Some(stored) = self.password_hash.as_deref() else {
            tracing::warn!("no dashboard password hash configured; image page stays locked");
            return false;
        };
        self.authenticated = verify_password(password, stored);
        if !self.authenticated {
            tracing::warn!("dashboard password rejected");
        }
        self.authenticated
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn last_series(&self) -> Option<&TelemetrySeries> {
        self.last_series.as_ref()
    }

    pub fn cached_queries(&self) -> usize {
        self.series_cache.len() + self.image_cache.len()
    }

    /// Memoized telemetry query. Identical calls within the session skip the network.
    pub fn series(
        &self,
        parameter: &str,
        node_id: &str,
        window: &TimeWindow,
        sensor: Option<&str>,
        is_rain: bool,
    ) -> Result<TelemetrySeries, QueryError> {
        let filter = if is_rain {
            QueryFilter::rain(parameter, node_id)
        } else {
            QueryFilter::environment(parameter, node_id, sensor)
        };
        let key = QueryKey::new(&filter, window);
        let mut computed = false;
        let series = self.series_cache.get_or_try_compute(key, || {
            computed = true;
            self.source.query(&filter, window)
        })?;
        if !computed {
            tracing::debug!(parameter, node = node_id, "telemetry cache hit");
        }
        Ok(series)
    }

    pub fn environment(
        &mut self,
        parameter: &str,
        node_id: &str,
        window: TimeWindow,
        sensor: Option<&str>,
    ) -> Result<EnvironmentChart, SessionError> {
        let unit = environment_parameter(parameter).map(|p| p.unit).unwrap_or("");
        let series = self.series(parameter, node_id, &window, sensor, false)?;
        let chart = environment_chart(&series, node_id, parameter, unit);
        self.last_series = Some(series);
        Ok(chart)
    }

    pub fn rain(
        &mut self,
        parameter: &RainParameter,
        node_id: &str,
        window: TimeWindow,
    ) -> Result<RainChart, SessionError> {
        let series = self.series(parameter.key, node_id, &window, None, true)?;
        let chart = rain_chart(&series, node_id, parameter);
        self.last_series = Some(series);
        Ok(chart)
    }

    pub fn images(
        &self,
        camera: &str,
        node_id: &str,
        window: TimeWindow,
    ) -> Result<ImageBatch, SessionError> {
        if !self.authenticated {
            return Err(SessionError::Locked);
        }
        let key = ImageQueryKey::new(camera, node_id, &window);
        let records = self.image_cache.get_or_try_compute(key, || {
            self.source
                .query_images(&ImageQuery::camera(camera, node_id), &window)
        })?;
        let outcomes = fetch_all(records, self.fetcher.as_ref(), self.image_workers);
        let gallery = image_gallery(node_id, camera, &outcomes);
        Ok(ImageBatch { gallery, outcomes })
    }

    pub fn end(&mut self) {
        self.authenticated = false;
        self.last_series = None;
        self.series_cache.clear();
        self.image_cache.clear();
    }
}
