use shared::protocol::PROTOCOL_VSN;
use url::Url;

use crate::TransportError;

const WEBSOCKET_PATH: &str = "/realtime/v1/websocket";

/// Websocket URL for a project base URL such as `https://abc.supabase.co`.
///
/// `http(s)` maps to `ws(s)`; a path already ending in `/websocket` is kept.
pub fn realtime_endpoint(base_url: &str, api_key: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(base_url.trim())?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::UnsupportedScheme(scheme.to_string()))?;

    if !url.path().ends_with("/websocket") {
        let path = format!("{}{WEBSOCKET_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "apikey" && key != "vsn")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in &retained {
            query.append_pair(key, value);
        }
        query.append_pair("apikey", api_key);
        query.append_pair("vsn", PROTOCOL_VSN);
    }

    Ok(url)
}
