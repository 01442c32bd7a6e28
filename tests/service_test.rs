use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vini_data::client::{FetcherConfig, RetryPolicy};
use vini_data::domain::{Category, DataQuery, DataSource, Taxonomy, TaxonomyError, record_year};
use vini_data::reliability::CacheConfig;
use vini_data::scraper::ScraperConfig;
use vini_data::service::{DataService, DataServiceConfig, QueryError, RETRIEVAL_FAILED, cache_key};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bundled_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/fallback")
}

fn service(server: &MockServer, fallback_dir: PathBuf, ttl: Duration) -> DataService {
    let config = DataServiceConfig {
        fetcher: FetcherConfig {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(1, Duration::ZERO),
            ..FetcherConfig::default()
        },
        scraper: ScraperConfig {
            base_url: format!("{}/index.php", server.uri()),
            year_retries: 1,
            year_backoff: Duration::ZERO,
            request_pause: Duration::ZERO,
        },
        cache: CacheConfig { ttl, max_size: 16 },
        fallback_dir,
    };
    DataService::new(config, Arc::new(Taxonomy::builtin())).unwrap()
}

fn data_page(rows: usize) -> String {
    let body: String = (0..rows)
        .map(|i| format!("<tr><td>Vinho {i}</td><td>{}.000</td></tr>", i + 1))
        .collect();
    format!(
        r#"<html><body><div class="content"><table>
             <thead><tr><th>Produto</th><th>Quantidade (L.)</th></tr></thead>
             <tbody>{body}<tr><td>Total</td><td>-</td></tr></tbody>
           </table></div></body></html>"#
    )
}

async fn unreachable_upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_unreachable_upstream_falls_back_to_snapshot() {
    let server = unreachable_upstream().await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));

    let response = service
        .get_data(&DataQuery::new(Category::Producao, 1970, 1970))
        .await
        .unwrap();

    assert_eq!(response.data_source, Some(DataSource::FallbackFile));
    assert!(!response.from_cache);
    assert!(!response.data.is_empty());
    assert_eq!(response.total_records, response.data.len());
    assert!(response.data.iter().all(|r| record_year(r) == Some(1970)));
    assert!(response.data.iter().all(|r| r.contains_key("subcategoria")));
    assert_eq!(response.metadata["source"], json!("fallback_file"));
    assert_eq!(response.metadata["file"], json!("Producao.csv"));
}

#[tokio::test]
async fn test_every_category_survives_an_outage() {
    let server = unreachable_upstream().await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));

    for category in Category::ALL {
        let response = service
            .get_data(&DataQuery::new(category, 2000, 2000))
            .await
            .unwrap();
        assert_eq!(response.data_source, Some(DataSource::FallbackFile), "{category}");
        assert!(!response.data.is_empty(), "{category}");
    }
}

#[tokio::test]
async fn test_total_exhaustion_reports_failure() {
    let server = unreachable_upstream().await;
    let empty = TempDir::new().unwrap();
    let service = service(&server, empty.path().to_path_buf(), Duration::from_secs(60));

    let response = service
        .get_data(&DataQuery::new(Category::Importacao, 2010, 2010))
        .await
        .unwrap();

    assert!(response.is_error());
    assert_eq!(response.error.as_deref(), Some(RETRIEVAL_FAILED));
    assert!(response.data.is_empty());
    assert_eq!(response.data_source, None);
}

#[tokio::test]
async fn test_online_then_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("ano", "2020"))
        .respond_with(ResponseTemplate::new(200).set_body_string(data_page(12)))
        .expect(1)
        .mount(&server)
        .await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));
    let query = DataQuery::new(Category::Producao, 2020, 2020);

    let first = service.get_data(&query).await.unwrap();
    assert_eq!(first.data_source, Some(DataSource::Online));
    assert!(!first.from_cache);
    assert_eq!(first.total_records, 13);

    // Locale numbers are converted and the "-" sentinel is nulled.
    assert_eq!(first.data[0]["Quantidade (L.)"], json!(1000));
    assert_eq!(first.data[12]["Quantidade (L.)"], Value::Null);
    assert_eq!(first.data[0]["subcategoria"], json!("vinhos"));
    assert_eq!(first.metadata["years_found"], json!([2020]));

    let second = service.get_data(&query).await.unwrap();
    assert_eq!(second.data_source, Some(DataSource::Cache));
    assert!(second.from_cache);
    assert_eq!(second.data, first.data);
    assert!(service.cache().contains_fresh(&cache_key(&query)));
}

#[tokio::test]
async fn test_expired_entry_is_served_stale_during_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(data_page(12)))
        .mount(&server)
        .await;
    let service = service(&server, bundled_dir(), Duration::from_millis(20));
    let query = DataQuery::new(Category::Producao, 2021, 2021);

    let fresh = service.get_data(&query).await.unwrap();
    assert_eq!(fresh.data_source, Some(DataSource::Online));

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stale = service.get_data(&query).await.unwrap();
    assert_eq!(stale.data_source, Some(DataSource::Cache));
    assert!(stale.from_cache);
    assert_eq!(stale.metadata["stale"], json!(true));
    assert_eq!(stale.total_records, fresh.total_records);
}

#[tokio::test]
async fn test_sparse_page_is_recovered_from_raw_html() {
    let html = r#"
        <html><body>
          <div class="content">
            <table><tr><td>Menu</td></tr><tr><td>Início</td></tr><tr><td>Sobre</td></tr></table>
          </div>
          <table>
            <tr><td>Cultivar</td><td>Quantidade (Kg)</td></tr>
            <tr><td>Cabernet Sauvignon</td><td>1.000</td></tr>
            <tr><td>Merlot</td><td>2.000</td></tr>
            <tr><td>Tannat</td><td>3.000</td></tr>
            <tr><td>Chardonnay</td><td>4.000</td></tr>
            <tr><td>Isabel</td><td>5.000</td></tr>
          </table>
        </body></html>
    "#;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("subopcao", "subopt_01"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(&server)
        .await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));

    let query = DataQuery::new(Category::Processamento, 2015, 2015).with_subcategory("viniferas");
    let response = service.get_data(&query).await.unwrap();

    assert_eq!(response.data_source, Some(DataSource::Online));
    assert_eq!(response.metadata["recovered"], json!(true));
    let cultivars: Vec<_> = response
        .data
        .iter()
        .filter(|r| r.contains_key("Cultivar"))
        .collect();
    assert_eq!(cultivars.len(), 5);
    assert_eq!(response.data.len(), 5);
    assert_eq!(response.total_records, 5);
    assert!(cultivars.iter().all(|r| r["year"] == json!(2015)));
    assert!(cultivars.iter().all(|r| r["subcategoria"] == json!("viniferas")));
    assert_eq!(response.metadata["detected_subcategory"], json!("viniferas"));
}

#[tokio::test]
async fn test_product_type_selects_subcategory_and_filters_rows() {
    let server = unreachable_upstream().await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));

    let query = DataQuery::new(Category::Importacao, 2005, 2005).with_origin("Chile");
    let response = service.get_data(&query).await.unwrap();
    assert_eq!(response.data_source, Some(DataSource::FallbackFile));
    assert!(!response.data.is_empty());
    assert!(response.data.iter().all(|r| r["País"] == json!("Chile")));

    let query = DataQuery::new(Category::Importacao, 2005, 2005).with_product_type("Espumante");
    let response = service.get_data(&query).await.unwrap();
    assert_eq!(response.metadata["file"], json!("ImpEspumantes.csv"));
    assert!(response.data.iter().all(|r| r["subcategoria"] == json!("espumantes")));
}

#[tokio::test]
async fn test_unknown_subcategory_is_an_error() {
    let server = unreachable_upstream().await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));

    let query = DataQuery::new(Category::Exportacao, 2020, 2020).with_subcategory("licores");
    let result = service.get_data(&query).await;
    assert!(matches!(
        result,
        Err(QueryError::Taxonomy(TaxonomyError::UnknownSubcategory { .. }))
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshot_without_requested_years_is_a_miss() {
    let server = unreachable_upstream().await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));

    let response = service
        .get_data(&DataQuery::new(Category::Producao, 2030, 2030))
        .await
        .unwrap();

    assert!(response.is_error());
    assert_eq!(response.error.as_deref(), Some(RETRIEVAL_FAILED));
    assert!(response.data.is_empty());
    assert_eq!(response.data_source, None);
}

#[tokio::test]
async fn test_inverted_year_range_is_rejected() {
    let server = unreachable_upstream().await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));

    let result = service
        .get_data(&DataQuery::new(Category::Producao, 2021, 2020))
        .await;

    assert_eq!(
        result.unwrap_err(),
        QueryError::InvertedRange { start: 2021, end: 2020 }
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_channel_selects_a_known_sales_channel() {
    let server = unreachable_upstream().await;
    let service = service(&server, bundled_dir(), Duration::from_secs(60));
    let channels = ["varejo", "grandes_redes", "exportacao_indireta"];

    let query = DataQuery::new(Category::Comercializacao, 2010, 2010).with_channel("supermercados");
    let response = service.get_data(&query).await.unwrap();
    assert_eq!(response.data_source, Some(DataSource::FallbackFile));
    assert!(!response.data.is_empty());
    assert!(
        response
            .data
            .iter()
            .all(|r| r["canal"].as_str().is_some_and(|c| channels.contains(&c)))
    );

    let query = DataQuery::new(Category::Comercializacao, 2011, 2011).with_channel("Grandes redes");
    let response = service.get_data(&query).await.unwrap();
    assert!(!response.data.is_empty());
    assert!(response.data.iter().all(|r| r["canal"] == json!("grandes_redes")));
}
