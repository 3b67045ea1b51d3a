use crate::api::model::{ApiPricedVariant, ApiProduct};
use crate::config;
use crate::logging::{log, LogLevel};
use crate::model::product::{NormalizedProduct, ParsedPage};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

/// Turns the raw `products` array of one page into normalized rows plus the
/// category names seen on them. Records without a `product_uid`, or that do
/// not match the expected shape, are skipped.
pub fn parse_products(records: &[Value]) -> ParsedPage {
    let mut parsed = ParsedPage {
        products: Vec::with_capacity(records.len()),
        ..Default::default()
    };

    for record in records {
        let product = match ApiProduct::deserialize(record) {
            Ok(p) => p,
            Err(e) => {
                log(
                    LogLevel::Warning,
                    &format!("Skipping malformed product record: {}", e),
                );
                parsed.skipped_records += 1;
                continue;
            }
        };

        parsed.taxonomy_names.extend(
            product
                .categories
                .iter()
                .filter_map(|c| c.name.as_ref())
                .filter(|n| !n.trim().is_empty())
                .cloned(),
        );

        match normalize_product(product) {
            Some(p) => parsed.products.push(p),
            None => parsed.skipped_records += 1,
        }
    }

    parsed
}

pub fn normalize_product(product: ApiProduct) -> Option<NormalizedProduct> {
    let id = product.product_uid.clone()?;
    let (original_price, discounted_price) = resolve_prices(&product);

    Some(NormalizedProduct::new(
        id,
        product
            .name
            .unwrap_or_else(|| config::MISSING_FIELD_PLACEHOLDER.to_string()),
        original_price,
        discounted_price,
        product.eans.join(","),
        product
            .full_url
            .unwrap_or_else(|| config::MISSING_FIELD_PLACEHOLDER.to_string()),
    ))
}

/// Returns `(original, discounted)` before normalization.
fn resolve_prices(product: &ApiProduct) -> (Option<BigDecimal>, Option<BigDecimal>) {
    match product.product_type.as_deref() {
        Some(config::PRODUCT_TYPE_CATCHWEIGHT) => {
            let cheapest = cheapest_variant_price(&product.catchweight);
            (cheapest.clone(), cheapest)
        }
        Some(config::PRODUCT_TYPE_MULTIVARIANT) => {
            let cheapest = cheapest_variant_price(&product.multivariants);
            (cheapest.clone(), cheapest)
        }
        _ => {
            let retail = product.retail_price().cloned();
            let mut original = retail.clone();
            let mut discounted = retail.clone();

            let zero = BigDecimal::from(0);
            for promotion in &product.promotions {
                if promotion.promo_type.as_deref() == Some(config::PROMO_TYPE_MEAL_DEAL) {
                    continue;
                }
                if let Some(promo_original) = promotion.original_price.as_ref().filter(|p| **p > zero) {
                    original = Some(promo_original.clone());
                    discounted = Some(retail.clone().unwrap_or_else(|| promo_original.clone()));
                }
            }
            (original, discounted)
        }
    }
}

fn cheapest_variant_price(variants: &[ApiPricedVariant]) -> Option<BigDecimal> {
    let zero = BigDecimal::from(0);
    variants
        .iter()
        .filter_map(ApiPricedVariant::price)
        .filter(|p| **p > zero)
        .min()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn plain_price_without_promotion_has_no_discount() {
        let page = parse_products(&[json!({
            "product_uid": "7001",
            "name": "Semi Skimmed Milk",
            "eans": ["5000128", "5000129"],
            "full_url": "https://example.test/milk",
            "product_type": "BASIC",
            "retail_price": {"price": 2.00}
        })]);

        assert_eq!(page.products.len(), 1);
        let p = &page.products[0];
        assert_eq!(p.id, "7001");
        assert_eq!(p.eans, "5000128,5000129");
        assert_eq!(p.original_price, Some(dec("2")));
        assert_eq!(p.discounted_price, None);
    }

    #[test]
    fn qualifying_promotion_sets_original_and_discounted() {
        let page = parse_products(&[json!({
            "product_uid": "7002",
            "name": "Cheddar",
            "product_type": "BASIC",
            "retail_price": {"price": 2.50},
            "promotions": [{"promo_type": "SIMPLE_FIXED_PRICE", "original_price": 3.00}]
        })]);

        let p = &page.products[0];
        assert_eq!(p.original_price, Some(dec("3.00")));
        assert_eq!(p.discounted_price, Some(dec("2.50")));
    }

    #[test]
    fn meal_deal_promotions_are_ignored() {
        let page = parse_products(&[json!({
            "product_uid": "7003",
            "product_type": "BASIC",
            "retail_price": {"price": 1.25},
            "promotions": [{"promo_type": "MEAL_MULTI_DEAL_FOR_X", "original_price": 4.00}]
        })]);

        let p = &page.products[0];
        assert_eq!(p.original_price, Some(dec("1.25")));
        assert_eq!(p.discounted_price, None);
        assert_eq!(p.name, "N/A");
        assert_eq!(p.url, "N/A");
    }

    #[test]
    fn catchweight_and_multivariant_use_cheapest_positive_price() {
        let page = parse_products(&[
            json!({
                "product_uid": "cw",
                "product_type": "CATCHWEIGHT",
                "catchweight": [
                    {"retail_price": {"price": 5.10}},
                    {"retail_price": {"price": 0}},
                    {"retail_price": {"price": 4.35}}
                ]
            }),
            json!({
                "product_uid": "mv",
                "product_type": "MULTIVARIANT",
                "multivariants": [{"retail_price": {"price": "1.99"}}, {"retail_price": null}]
            }),
            json!({"product_uid": "empty", "product_type": "MULTIVARIANT", "multivariants": null}),
        ]);

        assert_eq!(page.products[0].original_price, Some(dec("4.35")));
        assert_eq!(page.products[0].discounted_price, None);
        assert_eq!(page.products[1].original_price, Some(dec("1.99")));
        assert_eq!(page.products[2].original_price, None);
    }

    #[test]
    fn records_without_uid_are_skipped_and_names_collected() {
        let page = parse_products(&[
            json!({"name": "No id", "categories": [{"name": "Bakery"}]}),
            json!({"product_uid": "9", "eans": null, "categories": [{"name": "Dairy"}, {"name": ""}]}),
            json!("not an object"),
        ]);

        assert_eq!(page.products.len(), 1);
        assert_eq!(page.products[0].eans, "");
        assert_eq!(page.skipped_records, 2);
        assert_eq!(page.taxonomy_names, vec!["Bakery".to_string(), "Dairy".to_string()]);
    }

    #[test]
    fn numeric_uids_are_kept_as_text() {
        let page = parse_products(&[
            json!({"product_uid": 7562181, "retail_price": {"price": 1.00}}),
            json!({"product_uid": 12.0}),
            json!({"product_uid": true}),
        ]);

        let ids: Vec<&str> = page.products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["7562181", "12"]);
        assert_eq!(page.skipped_records, 1);
    }
}
