use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use tfw_core::{GeoPoint, WeatherObservation, WeatherTimestamp, WEATHER_SOURCE};
use tfw_storage::HttpFetcher;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::robots::ComplianceGate;
use crate::{ExtractError, WeatherSource};

pub const WEATHER_TABLE_ID: &str = "wt-his";
pub const TEMPERATURE_HEADER_TOKEN: &str = "Temp";
/// Minimum `<td>` cells in a usable data row (icon column included).
pub const MIN_DATA_CELLS: usize = 7;

/// `<base>/<country>/<city>/historic?month=M&year=YYYY&hd=YYYYMMDD`
pub fn day_url(base_url: &str, country_slug: &str, city: &str, date: NaiveDate) -> String {
    format!(
        "{}/{}/{}/historic?month={}&year={}&hd={}",
        base_url.trim_end_matches('/'),
        country_slug,
        city,
        date.month(),
        date.year(),
        date.format("%Y%m%d")
    )
}

/// One way of finding the observation table in a page.
pub trait TableLocator: Send + Sync {
    fn name(&self) -> &'static str;
    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>>;
}

#[derive(Debug, Clone)]
pub struct TableById(pub String);

impl TableLocator for TableById {
    fn name(&self) -> &'static str {
        "table-id"
    }

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        let selector = Selector::parse("table[id]").ok()?;
        document
            .select(&selector)
            .find(|table| table.value().id() == Some(self.0.as_str()))
    }
}

/// First table whose first row mentions the token.
#[derive(Debug, Clone)]
pub struct TableByHeaderToken(pub String);

impl TableLocator for TableByHeaderToken {
    fn name(&self) -> &'static str {
        "header-token"
    }

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        let tables = Selector::parse("table").ok()?;
        let rows = Selector::parse("tr").ok()?;
        document.select(&tables).find(|table| {
            table
                .select(&rows)
                .next()
                .is_some_and(|header| header.text().collect::<String>().contains(self.0.as_str()))
        })
    }
}

/// Tried in order: the known table id, then a header scan.
pub fn default_table_locators() -> Vec<Box<dyn TableLocator>> {
    vec![
        Box::new(TableById(WEATHER_TABLE_ID.to_string())),
        Box::new(TableByHeaderToken(TEMPERATURE_HEADER_TOKEN.to_string())),
    ]
}

/// `<td>` offsets of each field; offset 0 holds the condition icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub temperature: usize,
    pub description: usize,
    pub wind: usize,
    pub humidity: usize,
    pub pressure: usize,
    pub visibility: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            temperature: 1,
            description: 2,
            wind: 3,
            humidity: 4,
            pressure: 5,
            visibility: 6,
        }
    }
}

/// Lenient number reader for table cells.
///
/// Keeps digits, `,`, `.` and `-`, stops at the first space once a number has
/// started, and reads `,` as a decimal point. `"14,5 °C"` gives `14.5`.
pub fn parse_float(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut cleaned = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || matches!(ch, ',' | '.' | '-') {
            cleaned.push(ch);
        } else if ch == ' ' && !cleaned.is_empty() {
            break;
        }
    }
    cleaned.replace(',', ".").parse().ok()
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|err| ExtractError::Selector(format!("{css}: {err}")))
}

/// Element text with each text node trimmed and joined by single spaces.
pub fn cell_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct WeatherTableParser {
    locators: Vec<Box<dyn TableLocator>>,
    layout: ColumnLayout,
    point: GeoPoint,
}

impl std::fmt::Debug for WeatherTableParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherTableParser")
            .field("locators", &self.locators.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("layout", &self.layout)
            .field("point", &self.point)
            .finish()
    }
}

impl WeatherTableParser {
    pub fn new(point: GeoPoint) -> Self {
        Self {
            locators: default_table_locators(),
            layout: ColumnLayout::default(),
            point,
        }
    }

    pub fn with_locators(mut self, locators: Vec<Box<dyn TableLocator>>) -> Self {
        self.locators = locators;
        self
    }

    pub fn with_layout(mut self, layout: ColumnLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Every well-formed row of the day's table. A page without a table yields
    /// nothing; a malformed row is skipped without affecting the others.
    pub fn parse(&self, html: &str, date: NaiveDate) -> Vec<WeatherObservation> {
        if html.trim().is_empty() {
            return Vec::new();
        }
        let document = Html::parse_document(html);

        let located = self.locators.iter().find_map(|locator| {
            locator.locate(&document).map(|table| (locator.name(), table))
        });
        let Some((locator, table)) = located else {
            warn!(%date, "no weather table found in page");
            return Vec::new();
        };
        debug!(%date, locator, "weather table located");

        let (rows, cells, heads) = match (selector("tr"), selector("td"), selector("th")) {
            (Ok(rows), Ok(cells), Ok(heads)) => (rows, cells, heads),
            (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                error!(error = %err, "weather row selectors unavailable");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for (index, row) in table.select(&rows).enumerate().skip(1) {
            let data: Vec<ElementRef<'_>> = row.select(&cells).collect();
            let Some(time_cell) = row.select(&heads).next() else {
                warn!(%date, row = index, "weather row has no time cell; skipping");
                continue;
            };
            if data.len() < MIN_DATA_CELLS {
                warn!(%date, row = index, cells = data.len(), "weather row too short; skipping");
                continue;
            }

            match self.parse_row(date, &time_cell, &data) {
                Some(record) => records.push(record),
                None => warn!(%date, row = index, "weather row time unreadable; skipping"),
            }
        }
        records
    }

    fn parse_row(
        &self,
        date: NaiveDate,
        time_cell: &ElementRef<'_>,
        data: &[ElementRef<'_>],
    ) -> Option<WeatherObservation> {
        let field = |offset: usize| data.get(offset).map(cell_text).unwrap_or_default();

        let time_text = cell_text(time_cell);
        let time_token = time_text.split_whitespace().next()?;
        let timestamp = WeatherTimestamp::parse_on(date, time_token)?;

        Some(WeatherObservation {
            timestamp,
            point: self.point,
            temperature_c: parse_float(&field(self.layout.temperature)),
            description: field(self.layout.description),
            wind_speed: parse_float(&field(self.layout.wind)),
            wind_dir: String::new(),
            humidity: parse_float(&field(self.layout.humidity)),
            pressure: parse_float(&field(self.layout.pressure)),
            visibility: parse_float(&field(self.layout.visibility)),
            source: WEATHER_SOURCE.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WeatherSiteConfig {
    pub base_url: String,
    pub country_slug: String,
    pub city: String,
}

/// Historic weather page client: robots check, resilient fetch, table parse.
#[derive(Debug)]
pub struct WeatherAdapter {
    http: Arc<HttpFetcher>,
    gate: ComplianceGate,
    site: WeatherSiteConfig,
    parser: WeatherTableParser,
}

impl WeatherAdapter {
    pub fn new(
        http: Arc<HttpFetcher>,
        gate: ComplianceGate,
        site: WeatherSiteConfig,
        parser: WeatherTableParser,
    ) -> Self {
        Self {
            http,
            gate,
            site,
            parser,
        }
    }

    pub fn url_for(&self, date: NaiveDate) -> String {
        day_url(&self.site.base_url, &self.site.country_slug, &self.site.city, date)
    }
}

#[async_trait]
impl WeatherSource for WeatherAdapter {
    async fn fetch_day(&self, date: NaiveDate) -> Option<Vec<WeatherObservation>> {
        let url = self.url_for(date);
        let span = info_span!("weather_fetch", %date);
        async {
            if !self.gate.is_allowed(&url).await {
                return None;
            }
            let resp = self.http.fetch_resilient(&url).await.ok()?;
            Some(self.parser.parse(&resp.text(), date))
        }
        .instrument(span)
        .await
    }
}
