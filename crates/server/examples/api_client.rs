//! Walks a running gatekeep server through its routes.
//!
//! Start the server with the development defaults, then:
//! `cargo run -p gatekeep-server --example api_client`

use reqwest::Client;
use serde_json::{json, Value};

const SERVER_URL: &str = "http://localhost:8080";
const API_KEY: &str = "api_key_1";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = Client::new();
    let email = format!("demo-{}@example.com", std::process::id());

    println!("1. Health Check:");
    let resp = client.get(format!("{SERVER_URL}/health")).send().await?;
    println!("Status: {}", resp.status());
    println!("Body: {}", resp.text().await?);
    println!();

    println!("2. Register:");
    let resp = client
        .post(format!("{SERVER_URL}/users"))
        .json(&json!({
            "username": "demo",
            "email": email,
            "password": "Password123",
            "confirmPassword": "Password123"
        }))
        .send()
        .await?;
    println!("Status: {}", resp.status());
    println!("Body: {}", resp.text().await?);
    println!();

    println!("3. Login:");
    let resp = client
        .post(format!("{SERVER_URL}/auth/login"))
        .json(&json!({ "email": email, "password": "Password123" }))
        .send()
        .await?;
    println!("Status: {}", resp.status());
    let body: Value = resp.json().await?;
    println!("Body: {body}");
    let token = body["token"].as_str().unwrap_or_default().to_string();
    println!();

    println!("4. List Users (API key):");
    let resp = client
        .get(format!("{SERVER_URL}/users"))
        .bearer_auth(API_KEY)
        .send()
        .await?;
    println!("Status: {}", resp.status());
    println!("Body: {}", resp.text().await?);
    println!();

    println!("5. List Users (wrong key):");
    let resp = client
        .get(format!("{SERVER_URL}/users"))
        .bearer_auth("not-a-key")
        .send()
        .await?;
    println!("Status: {}", resp.status());
    println!("Body: {}", resp.text().await?);
    println!();

    println!("6. OCR (token):");
    let resp = client
        .post(format!("{SERVER_URL}/data"))
        .bearer_auth(&token)
        .json(&json!({
            "image_url": "https://example.com/label.png",
            "item_names": ["Ingredients", "Nutrition"]
        }))
        .send()
        .await?;
    println!("Status: {}", resp.status());
    println!("Body: {}", resp.text().await?);
    println!();

    println!("7. Burst logins until rate limited:");
    for attempt in 1..=7 {
        let resp = client
            .post(format!("{SERVER_URL}/auth/login"))
            .json(&json!({ "email": email, "password": "wrong" }))
            .send()
            .await?;
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        println!(
            "Attempt {attempt}: {} (retry-after: {})",
            resp.status(),
            retry_after.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
