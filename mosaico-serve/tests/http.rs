//! End-to-end tests: build a synthetic dataset, then query it over HTTP
//! in-process.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use mosaico_extract::{read_source_raster, run_build};
use mosaico_geometry::BoundingBox;
use mosaico_serve::api::build_router;
use mosaico_serve::{procedural_elevation, ServerState};
use mosaico_test::TestDataset;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(ds: &TestDataset) -> Router {
    run_build(&ds.config.dataset).unwrap();
    build_router(Arc::new(ServerState::load(&ds.config).unwrap()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn test_health_and_index() {
    let ds = TestDataset::generate(11).unwrap();
    let app = app(&ds);

    let (status, health) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["layers"], json!(4));

    let (status, index) = get(app.clone(), "/tiles/index").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(index["cell_size"], json!(TestDataset::CELL_SIZE));
    assert_eq!(index["layers"]["elevacion"]["kind"], "raster");
    assert_eq!(index["total_tiles"], health["total_tiles"]);

    let (status, doc) = get(app, "/api-docs/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/tiles/vector/query"].is_object());
    assert!(doc["paths"]["/tiles/elevation/batch"].is_object());
}

#[tokio::test]
async fn test_query_without_intersecting_tiles() {
    let ds = TestDataset::generate(5).unwrap();
    let (status, body) = post(
        app(&ds),
        "/tiles/vector/query",
        json!({
            "bounds": {"north": 10.0, "south": 9.0, "east": 11.0, "west": 10.0},
            "layers": ["hidrografia"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["layers"]["hidrografia"]["features"], json!([]));
    assert_eq!(body["layers"]["hidrografia"]["type"], "FeatureCollection");
    assert_eq!(body["tiles_loaded"], json!(0));
}

#[tokio::test]
async fn test_query_spanning_two_tiles_returns_union() {
    let ds = TestDataset::generate(8).unwrap();
    let app = app(&ds);
    let cell = TestDataset::CELL_SIZE;
    let region = ds.config.dataset.bounds;

    // Two cells in the first row, queried one by one and then together
    let (w, n) = (region.west, region.north);
    let one = json!({"north": n - 0.1, "south": n - cell + 0.1, "east": w + cell - 0.1, "west": w + 0.1});
    let two = json!({"north": n - 0.1, "south": n - cell + 0.1, "east": w + 2.0 * cell - 0.1, "west": w + cell + 0.1});
    let both = json!({"north": n - 0.1, "south": n - cell + 0.1, "east": w + 2.0 * cell - 0.1, "west": w + 0.1});

    let mut counts = Vec::new();
    for bounds in [one, two, both] {
        let (status, body) = post(
            app.clone(),
            "/tiles/vector/query",
            json!({"bounds": bounds, "layers": ["hidrografia", "ruta_nacional"]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let layer_len = |name: &str| body["layers"][name]["features"].as_array().unwrap().len();
        counts.push((
            layer_len("hidrografia") + layer_len("ruta_nacional"),
            body["tiles_loaded"].as_u64().unwrap(),
        ));
    }
    let (a, tiles_a) = counts[0];
    let (b, tiles_b) = counts[1];
    let (union, tiles_union) = counts[2];
    assert_eq!(union, a + b);
    assert_eq!(tiles_union, tiles_a + tiles_b);
}

#[tokio::test]
async fn test_dedupe_by_id_over_http() {
    let ds = TestDataset::generate(9).unwrap();
    let app = app(&ds);
    let r = ds.config.dataset.bounds;
    let bounds = json!({"north": r.north, "south": r.south, "east": r.east, "west": r.west});

    let (_, body) = post(
        app,
        "/tiles/vector/query",
        json!({"bounds": bounds, "layers": ["hidrografia"], "dedupe_by_id": true}),
    )
    .await;
    let ids: Vec<&Value> = body["layers"]["hidrografia"]["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| &f["id"])
        .collect();
    let distinct: BTreeSet<String> = ids.iter().map(|id| id.to_string()).collect();
    assert_eq!(ids.len(), distinct.len());
    // Every river runs the full height of the region
    assert_eq!(distinct.len(), 6);
}

#[tokio::test]
async fn test_elevation_batch_matches_source_raster() {
    let ds = TestDataset::generate(2).unwrap();
    let app = app(&ds);
    let source = read_source_raster(&ds.root().join("data/dem.asc")).unwrap();

    let pixels = [(3, 4), (26, 51), (50, 50), (99, 0)];
    let points: Vec<Value> = pixels
        .iter()
        .enumerate()
        .map(|(i, &(row, col))| {
            let (lat, lon) = source.transform.pixel_center(row, col);
            json!({"lat": lat, "lon": lon, "index": i})
        })
        .collect();

    let (status, body) = post(app, "/tiles/elevation/batch", json!({"points": points})).await;
    assert_eq!(status, StatusCode::OK);
    for (i, &(row, col)) in pixels.iter().enumerate() {
        let expected = f64::from(source.value_at(row, col).unwrap());
        assert_eq!(body["elevations"][i], json!(expected), "pixel ({row}, {col})");
    }
    assert_eq!(body["valid_count"], json!(4));
    assert!(body["processing_time"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_elevation_batch_index_order_and_fallback() {
    let ds = TestDataset::generate(4).unwrap();
    let app = app(&ds);
    let region: BoundingBox = ds.config.dataset.bounds.try_into().unwrap();
    let (lat, lon) = region.center();

    let (status, body) = post(
        app,
        "/tiles/elevation/batch",
        json!({"points": [
            {"lat": lat, "lon": lon, "index": 5},
            {"lat": 10.0, "lon": 10.0, "index": 0}
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let elevations = body["elevations"].as_array().unwrap();
    assert_eq!(elevations.len(), 6);
    assert!(elevations[1..5].iter().all(Value::is_null));
    assert_eq!(elevations[0], json!(procedural_elevation(10.0, 10.0)));
    let inside = elevations[5].as_f64().unwrap();
    assert!((200.0..=800.0).contains(&inside));
    assert_eq!(body["count"], json!(2));
    assert_eq!(body["valid_count"], json!(2));
    assert_eq!(body["tiles_loaded"], json!(1));
}
