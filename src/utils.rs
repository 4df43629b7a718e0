use axum::response::Html;
use tera::{Context, Tera};

pub mod session;

pub fn render_template(tera: &Tera, template_name: &str, context: Context) -> Html<String> {
    Html(
        tera.render(template_name, &context)
            .unwrap_or_else(|_| format!("Error rendering template: {}", template_name)),
    )
}
