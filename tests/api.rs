mod common;

use std::io::Write;
use std::time::Duration;

use common::test_server::TestServer;
use serde_json::{Value, json};

fn bundle(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, contents) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn create_app(client: &reqwest::Client, server: &TestServer, name: &str) -> Value {
    let resp = client
        .post(format!("{}/apps", server.base_url))
        .bearer_auth(&server.access_key)
        .json(&json!({ "name": name }))
        .send()
        .await
        .expect("create app");
    assert_eq!(resp.status(), 201);
    resp.json().await.expect("parse app response")
}

async fn deployment_key(
    client: &reqwest::Client,
    server: &TestServer,
    app: &str,
    deployment: &str,
) -> String {
    let resp: Value = client
        .get(format!(
            "{}/apps/{}/deployments/{}",
            server.base_url, app, deployment
        ))
        .bearer_auth(&server.access_key)
        .send()
        .await
        .expect("get deployment")
        .json()
        .await
        .expect("parse deployment");
    resp["deployment"]["key"]
        .as_str()
        .expect("deployment key")
        .to_string()
}

async fn release_bundle(
    client: &reqwest::Client,
    server: &TestServer,
    app: &str,
    deployment: &str,
    bundle: Vec<u8>,
    package_info: Value,
) -> reqwest::Response {
    let form = reqwest::multipart::Form::new()
        .part(
            "package",
            reqwest::multipart::Part::bytes(bundle).file_name("bundle.zip"),
        )
        .text("packageInfo", package_info.to_string());

    client
        .post(format!(
            "{}/apps/{}/deployments/{}/release",
            server.base_url, app, deployment
        ))
        .bearer_auth(&server.access_key)
        .multipart(form)
        .send()
        .await
        .expect("release")
}

async fn update_check(
    client: &reqwest::Client,
    server: &TestServer,
    params: &[(&str, &str)],
) -> Value {
    let resp = client
        .get(format!("{}/updateCheck", server.base_url))
        .query(params)
        .send()
        .await
        .expect("update check");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("parse update check");
    body["updateInfo"].clone()
}

#[tokio::test]
async fn test_happy_update() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "HappyApp").await;
    let key = deployment_key(&client, &server, "HappyApp", "Staging").await;

    let resp = release_bundle(
        &client,
        &server,
        "HappyApp",
        "Staging",
        bundle(&[("index.js", b"console.log('v1')" as &[u8])]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let released: Value = resp.json().await.unwrap();
    let hash = released["package"]["packageHash"].as_str().unwrap();

    let info = update_check(
        &client,
        &server,
        &[
            ("deploymentKey", key.as_str()),
            ("appVersion", "1.0.0"),
            ("clientUniqueId", "c1"),
        ],
    )
    .await;

    assert_eq!(info["isAvailable"], json!(true));
    assert_eq!(info["label"], json!("v1"));
    assert_eq!(info["packageHash"], json!(hash));

    // The download URL must serve the exact bundle bytes.
    let url = info["downloadURL"].as_str().unwrap();
    let downloaded = client.get(url).send().await.unwrap();
    assert_eq!(downloaded.status(), 200);
    let bytes = downloaded.bytes().await.unwrap();
    assert_eq!(
        bytes.to_vec(),
        bundle(&[("index.js", b"console.log('v1')" as &[u8])])
    );
}

#[tokio::test]
async fn test_no_update_when_current() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "CurrentApp").await;
    let key = deployment_key(&client, &server, "CurrentApp", "Staging").await;

    let resp = release_bundle(
        &client,
        &server,
        "CurrentApp",
        "Staging",
        bundle(&[("index.js", b"v1" as &[u8])]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    let released: Value = resp.json().await.unwrap();
    let hash = released["package"]["packageHash"].as_str().unwrap().to_string();

    let info = update_check(
        &client,
        &server,
        &[
            ("deploymentKey", key.as_str()),
            ("appVersion", "1.0.0"),
            ("packageHash", hash.as_str()),
            ("clientUniqueId", "c1"),
        ],
    )
    .await;

    assert_eq!(info["isAvailable"], json!(false));
    assert_eq!(info["shouldRunBinaryVersion"], json!(true));
    assert_eq!(info["appVersion"], json!("1.0.0"));
}

#[tokio::test]
async fn test_rollout_exclusion() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "RolloutApp").await;
    let key = deployment_key(&client, &server, "RolloutApp", "Staging").await;

    release_bundle(
        &client,
        &server,
        "RolloutApp",
        "Staging",
        bundle(&[("index.js", b"v1" as &[u8])]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    let resp = release_bundle(
        &client,
        &server,
        "RolloutApp",
        "Staging",
        bundle(&[("index.js", b"v2" as &[u8])]),
        json!({ "appVersion": "1.0.0", "rollout": 50 }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    // Find a device the 50% rollout excludes.
    let mut excluded = None;
    for i in 0..200 {
        let candidate = format!("device-{i}");
        let info = update_check(
            &client,
            &server,
            &[
                ("deploymentKey", key.as_str()),
                ("appVersion", "1.0.0"),
                ("clientUniqueId", candidate.as_str()),
            ],
        )
        .await;
        if info["isAvailable"] == json!(false) {
            excluded = Some(candidate);
            break;
        }
    }
    let excluded = excluded.expect("some device outside a 50% rollout");

    // Completing the rollout admits that same device.
    let resp = client
        .patch(format!(
            "{}/apps/RolloutApp/deployments/Staging/release",
            server.base_url
        ))
        .bearer_auth(&server.access_key)
        .json(&json!({ "rollout": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let info = update_check(
        &client,
        &server,
        &[
            ("deploymentKey", key.as_str()),
            ("appVersion", "1.0.0"),
            ("clientUniqueId", excluded.as_str()),
        ],
    )
    .await;
    assert_eq!(info["isAvailable"], json!(true));
    assert_eq!(info["label"], json!("v2"));
}

#[tokio::test]
async fn test_diff_substitution() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "DiffApp").await;
    let key = deployment_key(&client, &server, "DiffApp", "Staging").await;

    // Incompressible payload so the full bundle stays much larger than
    // the diff archive.
    let mut seed: u64 = 0x5eed;
    let big_asset: Vec<u8> = (0..64 * 1024)
        .map(|_| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as u8
        })
        .collect();
    let resp = release_bundle(
        &client,
        &server,
        "DiffApp",
        "Staging",
        bundle(&[("index.js", b"v1" as &[u8]), ("asset.bin", &big_asset)]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    let released: Value = resp.json().await.unwrap();
    let v1_hash = released["package"]["packageHash"].as_str().unwrap().to_string();

    let resp = release_bundle(
        &client,
        &server,
        "DiffApp",
        "Staging",
        bundle(&[("index.js", b"v2" as &[u8]), ("asset.bin", &big_asset)]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    let released: Value = resp.json().await.unwrap();
    let full_size = released["package"]["size"].as_i64().unwrap();

    // Diff generation runs after the release response; poll until the
    // archive shows up.
    let mut info = Value::Null;
    for _ in 0..50 {
        info = update_check(
            &client,
            &server,
            &[
                ("deploymentKey", key.as_str()),
                ("appVersion", "1.0.0"),
                ("packageHash", v1_hash.as_str()),
                ("clientUniqueId", "c1"),
            ],
        )
        .await;
        if info["downloadURL"]
            .as_str()
            .is_some_and(|url| url.contains("diff_"))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(info["isAvailable"], json!(true));
    let url = info["downloadURL"].as_str().unwrap();
    assert!(url.contains(&format!("diff_{v1_hash}")), "got {url}");
    assert!(info["packageSize"].as_i64().unwrap() < full_size);

    // The diff archive carries only the changed file plus the deletion list.
    let bytes = client.get(url).send().await.unwrap().bytes().await.unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"hotcodepush.json".to_string()));
    assert!(names.contains(&"index.js".to_string()));
    assert!(!names.contains(&"asset.bin".to_string()));
}

#[tokio::test]
async fn test_promote_without_reupload() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "PromoteApp").await;

    let resp = release_bundle(
        &client,
        &server,
        "PromoteApp",
        "Staging",
        bundle(&[("index.js", b"v1" as &[u8])]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    let released: Value = resp.json().await.unwrap();
    let staging_hash = released["package"]["packageHash"].as_str().unwrap().to_string();

    let resp = client
        .post(format!(
            "{}/apps/PromoteApp/deployments/Staging/promote/Production",
            server.base_url
        ))
        .bearer_auth(&server.access_key)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let history: Value = client
        .get(format!(
            "{}/apps/PromoteApp/deployments/Production/history",
            server.base_url
        ))
        .bearer_auth(&server.access_key)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let latest = &history["history"][0];
    assert_eq!(latest["packageHash"], json!(staging_hash));
    assert_eq!(latest["releaseMethod"], json!("Promote"));
    assert_eq!(latest["originalDeployment"], json!("Staging"));
    assert_eq!(latest["originalLabel"], json!("v1"));
}

#[tokio::test]
async fn test_rollback_across_binary_versions_rejected() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "RollbackApp").await;

    release_bundle(
        &client,
        &server,
        "RollbackApp",
        "Staging",
        bundle(&[("index.js", b"v1" as &[u8])]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    release_bundle(
        &client,
        &server,
        "RollbackApp",
        "Staging",
        bundle(&[("index.js", b"v2" as &[u8])]),
        json!({ "appVersion": "2.0.0" }),
    )
    .await;

    let resp = client
        .post(format!(
            "{}/apps/RollbackApp/deployments/Staging/rollback",
            server.base_url
        ))
        .bearer_auth(&server.access_key)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("binary versions")
    );
}

#[tokio::test]
async fn test_legacy_update_check() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "LegacyApp").await;
    let key = deployment_key(&client, &server, "LegacyApp", "Staging").await;

    release_bundle(
        &client,
        &server,
        "LegacyApp",
        "Staging",
        bundle(&[("index.js", b"v1" as &[u8])]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;

    let resp = client
        .get(format!(
            "{}/v0.1/public/codepush/update_check",
            server.base_url
        ))
        .query(&[
            ("deployment_key", key.as_str()),
            ("app_version", "1.0.0"),
            ("client_unique_id", "c1"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let info = &body["update_info"];
    assert_eq!(info["is_available"], json!(true));
    assert_eq!(info["label"], json!("v1"));
    assert!(info["download_url"].as_str().is_some());
}

#[tokio::test]
async fn test_metrics_flow() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "MetricsApp").await;
    let key = deployment_key(&client, &server, "MetricsApp", "Staging").await;

    release_bundle(
        &client,
        &server,
        "MetricsApp",
        "Staging",
        bundle(&[("index.js", b"v1" as &[u8])]),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;

    let resp = client
        .post(format!("{}/reportStatus/download", server.base_url))
        .json(&json!({ "deploymentKey": key, "label": "v1", "clientUniqueId": "c1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/reportStatus/deploy", server.base_url))
        .json(&json!({
            "deploymentKey": key,
            "clientUniqueId": "c1",
            "label": "v1",
            "status": "DeploymentSucceeded",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let metrics: Value = client
        .get(format!(
            "{}/apps/MetricsApp/deployments/Staging/metrics",
            server.base_url
        ))
        .bearer_auth(&server.access_key)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let v1 = &metrics["metrics"]["v1"];
    assert_eq!(v1["downloads"], json!(1));
    assert_eq!(v1["installed"], json!(1));
    assert_eq!(v1["active"], json!(1));
    assert_eq!(v1["failed"], json!(0));
}

#[tokio::test]
async fn test_auth_and_key_masking() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    // No credentials.
    let resp = client
        .get(format!("{}/apps", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Bogus key.
    let resp = client
        .get(format!("{}/apps", server.base_url))
        .bearer_auth("ck_00000000000000000000000000000000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // A newly created key is returned once, then masked in listings.
    let resp = client
        .post(format!("{}/accessKeys", server.base_url))
        .bearer_auth(&server.access_key)
        .json(&json!({ "friendlyName": "ci" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let raw = created["accessKey"]["name"].as_str().unwrap();
    assert!(raw.starts_with("ck_"));

    let listed: Value = client
        .get(format!("{}/accessKeys", server.base_url))
        .bearer_auth(&server.access_key)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    for key in listed["accessKeys"].as_array().unwrap() {
        assert_eq!(key["name"], json!("(hidden)"));
    }

    // The new key authenticates.
    let resp = client
        .get(format!("{}/account", server.base_url))
        .bearer_auth(raw)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_unknown_deployment_key_is_404() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/updateCheck", server.base_url))
        .query(&[
            ("deploymentKey", "dk_00000000000000000000000000000000"),
            ("appVersion", "1.0.0"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_duplicate_release_conflicts() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    create_app(&client, &server, "DupApp").await;

    let payload = bundle(&[("index.js", b"same" as &[u8])]);
    let resp = release_bundle(
        &client,
        &server,
        "DupApp",
        "Staging",
        payload.clone(),
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let resp = release_bundle(
        &client,
        &server,
        "DupApp",
        "Staging",
        payload,
        json!({ "appVersion": "1.0.0" }),
    )
    .await;
    assert_eq!(resp.status(), 409);
}
