use axum::response::IntoResponse;

// Undocumented landing route.
pub async fn root() -> impl IntoResponse {
    format!(
        "{} {} - phishing defense lab\nAPI docs: /docs\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}
