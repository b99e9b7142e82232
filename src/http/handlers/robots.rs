//! GET /robots.txt — keep crawlers off an operational API.

pub async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /"
}
