use crate::model::common::{
    deserialize_null_default, deserialize_optional_flexible_id, deserialize_optional_flexible_u32,
    deserialize_optional_price, deserialize_optional_string, deserialize_string_list,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct ApiPagination {
    #[serde(default, deserialize_with = "deserialize_optional_flexible_u32")]
    pub active: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_optional_flexible_u32")]
    pub last: Option<u32>,
}

/// Reads `controls.page` from a product search response.
pub fn read_pagination(payload: &Value) -> Option<ApiPagination> {
    let page = payload.get("controls")?.get("page")?;
    if !page.is_object() {
        return None;
    }
    ApiPagination::deserialize(page).ok()
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiPrice {
    #[serde(default, deserialize_with = "deserialize_optional_price")]
    pub price: Option<BigDecimal>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiPromotion {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub promo_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_price")]
    pub original_price: Option<BigDecimal>,
}

/// Shape shared by `catchweight` ranges and `multivariants`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiPricedVariant {
    #[serde(default)]
    pub retail_price: Option<ApiPrice>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiCategoryRef {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct ApiProduct {
    #[serde(default, deserialize_with = "deserialize_optional_flexible_id")]
    pub product_uid: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub eans: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub full_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub product_type: Option<String>,
    #[serde(default)]
    pub retail_price: Option<ApiPrice>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub promotions: Vec<ApiPromotion>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub catchweight: Vec<ApiPricedVariant>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub multivariants: Vec<ApiPricedVariant>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub categories: Vec<ApiCategoryRef>,
}

impl ApiProduct {
    pub fn retail_price(&self) -> Option<&BigDecimal> {
        self.retail_price.as_ref().and_then(|p| p.price.as_ref())
    }
}

impl ApiPricedVariant {
    pub fn price(&self) -> Option<&BigDecimal> {
        self.retail_price.as_ref().and_then(|p| p.price.as_ref())
    }
}
