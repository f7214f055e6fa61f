//! Server-rendered chat page.

use crate::session::Exchange;

const TITLE: &str = "Asistente de Base de Datos de Procesadores";

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 72rem; padding: 0 1rem; }
form { display: flex; gap: .5rem; margin: 1rem 0; }
input[type=text] { flex: 1; padding: .5rem; font-size: 1rem; }
.spinner { display: none; color: #555; }
form.busy + .spinner { display: block; }
.answer { background: #f4f6f8; border-radius: .5rem; padding: 1rem; white-space: pre-wrap; }
details { border: 1px solid #ddd; border-radius: .5rem; margin: .5rem 0; padding: .5rem 1rem; }
details p { white-space: pre-wrap; }
"#;

/// Escape text for HTML element content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the page. `latest` is the exchange just answered, if any;
/// `history` must already be newest first.
pub fn render_page(latest: Option<&Exchange>, history: &[Exchange]) -> String {
    let mut body = String::new();

    body.push_str(&format!("<h1>🤖 {}</h1>\n", TITLE));
    body.push_str(
        "<p>¡Hola! Soy un asistente de IA que te ayuda a entender y consultar la base de datos \
         de procesadores. Hazme una pregunta.</p>\n",
    );
    body.push_str(
        r#"<form method="post" action="/" onsubmit="this.classList.add('busy')">
<input type="text" name="question" placeholder="Escribe tu pregunta aquí:" aria-label="Escribe tu pregunta aquí:" autofocus required>
<button type="submit">Preguntar</button>
</form>
<p class="spinner">Procesando tu pregunta...</p>
"#,
    );

    if let Some(exchange) = latest {
        body.push_str("<h3>Respuesta del Bot 🤖:</h3>\n");
        body.push_str(&format!(
            "<div class=\"answer\">{}</div>\n",
            escape_html(&exchange.answer)
        ));
    }

    body.push_str("<h2>Historial de Preguntas 📜</h2>\n");
    if !history.is_empty() {
        body.push_str(
            "<form method=\"post\" action=\"/reset\"><button type=\"submit\">Borrar historial</button></form>\n",
        );
    }
    for exchange in history {
        body.push_str(&format!(
            "<details><summary>Pregunta: {}</summary><p><strong>Respuesta:</strong> {}</p></details>\n",
            escape_html(&exchange.question),
            escape_html(&exchange.answer)
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        TITLE, STYLE, body
    )
}
