//! 地理编码查询参数
//!
//! 参数以键值对保存，发送前统一做 URL 编码

use reqwest::Url;

use crate::models::Login;

/// 一次服务商请求的查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeQuery {
    params: Vec<(String, String)>,
}

impl GeocodeQuery {
    /// 正向地理编码查询：`address = "{city} {state} {zip} {country}"`
    pub fn address(login: &Login) -> Self {
        let address = [&login.city, &login.state, &login.zip, &login.country]
            .iter()
            .map(|part| part.as_deref().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ");

        Self::with_param("address", address)
    }

    /// 海拔查询：`locations = "lat,lon"`
    pub fn elevation(latitude: f64, longitude: f64) -> Self {
        Self::with_param("locations", format!("{latitude},{longitude}"))
    }

    fn with_param(name: &str, value: String) -> Self {
        Self {
            params: vec![
                (name.to_string(), value),
                ("sensor".to_string(), "false".to_string()),
            ],
        }
    }

    /// 附加服务商 API key
    pub fn with_key(mut self, key: Option<&str>) -> Self {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            self.params.push(("key".to_string(), key.to_string()));
        }
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 拼接为完整的请求地址
    pub fn to_url(&self, base: &str) -> Result<Url, String> {
        Url::parse_with_params(base, &self.params).map_err(|e| format!("无效的服务地址 {base}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn login(city: Option<&str>, zip: Option<&str>) -> Login {
        Login {
            id: Uuid::new_v4(),
            email: "q@example.org".to_string(),
            name: None,
            address: Some("9500 Gilman Dr".to_string()),
            city: city.map(str::to_string),
            state: Some("CA".to_string()),
            zip: zip.map(str::to_string),
            country: Some("USA".to_string()),
            latitude: None,
            longitude: None,
            elevation: None,
            cannot_geocode: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_address_query() {
        let q = GeocodeQuery::address(&login(Some("La Jolla"), Some("92093")));
        assert_eq!(q.param("address"), Some("La Jolla CA 92093 USA"));
        assert_eq!(q.param("sensor"), Some("false"));
        assert_eq!(q.param("key"), None);
    }

    #[test]
    fn test_address_query_missing_parts() {
        let q = GeocodeQuery::address(&login(None, None));
        assert_eq!(q.param("address"), Some(" CA  USA"));
    }

    #[test]
    fn test_elevation_query_and_encoding() {
        let q = GeocodeQuery::elevation(32.88, -117.23).with_key(Some("secret"));
        assert_eq!(q.param("locations"), Some("32.88,-117.23"));

        let url = q.to_url("https://maps.example.com/elevation/json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://maps.example.com/elevation/json?locations=32.88%2C-117.23&sensor=false&key=secret"
        );
    }

    #[test]
    fn test_address_is_url_encoded() {
        let q = GeocodeQuery::address(&login(Some("São Paulo"), Some("01000-000")));
        let url = q.to_url("http://localhost/geocode").unwrap();
        assert!(url.as_str().contains("address=S%C3%A3o+Paulo+CA+01000-000+USA"));
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let q = GeocodeQuery::elevation(0.0, 0.0).with_key(Some(""));
        assert_eq!(q.param("key"), None);
    }
}
