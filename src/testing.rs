use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::product::{FetchTask, NormalizedProduct, RawPage};
use crate::transform::product::parse_products;
use crate::utils::run_cpu_intensive;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize)]
struct ParseFileOutput {
    active_page: Option<u32>,
    last_page: Option<u32>,
    skipped_records: usize,
    taxonomy_names: Vec<String>,
    products: Vec<NormalizedProduct>,
}

/// Runs the parse step over a saved search response (or a bare array of
/// product records) and writes the normalized products as JSON.
pub async fn test_parse_file(input_path: &Path, output_path: &Path) -> AppResult<usize> {
    log(LogLevel::Info, "--- Running Parse Test ---");
    log(
        LogLevel::Info,
        &format!("Input file: {}", input_path.display()),
    );
    log(
        LogLevel::Info,
        &format!("Output file: {}", output_path.display()),
    );

    let json_content = fs::read_to_string(input_path)
        .await
        .map_err(AppError::from)?;
    let payload: Value = serde_json::from_str(&json_content).map_err(AppError::from)?;
    let payload = match payload {
        Value::Array(records) => serde_json::json!({ "products": records }),
        other => other,
    };

    let page = RawPage::new(FetchTask::by_name("parse-file"), 1, payload);
    let (active_page, last_page) = (page.active_page, page.last_page);
    let parsed = run_cpu_intensive(move || parse_products(page.product_records())).await?;

    let count = parsed.products.len();
    log(
        LogLevel::Success,
        &format!(
            "Parsed {} product(s), skipped {} record(s), saw {} category name(s).",
            count,
            parsed.skipped_records,
            parsed.taxonomy_names.len()
        ),
    );

    let output = ParseFileOutput {
        active_page,
        last_page,
        skipped_records: parsed.skipped_records,
        taxonomy_names: parsed.taxonomy_names,
        products: parsed.products,
    };
    let body = serde_json::to_vec_pretty(&output).map_err(AppError::from)?;
    io::write_atomic(output_path, &body).await?;
    log(
        LogLevel::Success,
        &format!("Saved parse output to {}", output_path.display()),
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bare_array_input_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.json");
        let output = dir.path().join("out.json");
        fs::write(
            &input,
            r#"[{"product_uid": "1", "name": "Tea", "retail_price": {"price": 1.5}}]"#,
        )
        .await
        .unwrap();

        assert_eq!(test_parse_file(&input, &output).await.unwrap(), 1);
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&output).await.unwrap()).unwrap();
        assert_eq!(written["products"][0]["id"], "1");
        assert_eq!(written["products"][0]["discounted_price"], Value::Null);
    }
}
