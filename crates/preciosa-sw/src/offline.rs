//! Responses synthesized when neither the network nor the cache can answer.

use http::{header, HeaderValue, StatusCode};
use preciosa_net::{Response, ResponseSource};
use serde::{Deserialize, Serialize};

/// Body of the 503 served to subresource requests.
const UNAVAILABLE_BODY: &str = "Recurso no disponible offline";

/// Copy of the offline page served to navigations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflinePage {
    pub lang: String,
    pub title: String,
    pub emblem: String,
    pub heading: String,
    pub paragraphs: Vec<String>,
    pub signature: String,
}

impl Default for OfflinePage {
    fn default() -> Self {
        Self {
            lang: "es".to_string(),
            title: "Preciosa - Offline".to_string(),
            emblem: "💙".to_string(),
            heading: "Preciosa".to_string(),
            paragraphs: vec![
                "Estás offline, pero nuestro amor sigue conectado ❤️".to_string(),
                "Cuando recuperes la conexión, podrás ver nuestras fotos juntos.".to_string(),
            ],
            signature: "Te amo Anita preciosa".to_string(),
        }
    }
}

impl OfflinePage {
    /// Render the page as a complete HTML document.
    pub fn render(&self) -> String {
        let paragraphs: String = self
            .paragraphs
            .iter()
            .map(|p| format!("      <p>{}</p>\n", escape(p)))
            .collect();

        let signature = if self.signature.is_empty() {
            String::new()
        } else {
            format!("      <p><em>{}</em></p>\n", escape(&self.signature))
        };

        format!(
            r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
  <style>
    body {{
      font-family: 'Inter', sans-serif;
      background: linear-gradient(180deg, #00A6FF 0%, #6fd3ff 100%);
      color: white;
      height: 100vh;
      display: flex;
      justify-content: center;
      align-items: center;
      text-align: center;
      padding: 20px;
      margin: 0;
    }}
    .container {{ max-width: 400px; }}
    h1 {{
      font-family: 'Playfair Display', serif;
      font-size: 3rem;
      text-shadow: 2px 1px 2.5px black;
      margin-bottom: 20px;
    }}
    p {{ font-size: 1.2rem; line-height: 1.6; margin-bottom: 30px; }}
    .emblem {{ font-size: 3rem; animation: beat 1.5s infinite; }}
    @keyframes beat {{
      0%, 100% {{ transform: scale(1); }}
      50% {{ transform: scale(1.2); }}
    }}
  </style>
</head>
<body>
  <div class="container">
    <div class="emblem">{emblem}</div>
    <h1>{heading}</h1>
{paragraphs}{signature}  </div>
</body>
</html>
"#,
            lang = escape(&self.lang),
            title = escape(&self.title),
            emblem = escape(&self.emblem),
            heading = escape(&self.heading),
        )
    }

    /// The offline page as a 200 `text/html` response that must not be cached.
    pub fn response(&self) -> Response {
        Response::new(StatusCode::OK, self.render())
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/html"))
            .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .with_source(ResponseSource::Synthesized)
    }
}

/// 503 for subresources that are neither online nor cached.
pub fn service_unavailable() -> Response {
    Response::new(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY)
        .with_status_text("Service Unavailable")
        .with_source(ResponseSource::Synthesized)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
