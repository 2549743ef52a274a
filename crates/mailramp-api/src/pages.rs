//! Unsubscribe pages
//!
//! Rendered with minijinja from templates compiled into the binary. Template
//! names keep the `.html` suffix so values are auto-escaped.

use minijinja::{context, Environment, Error as MiniJinjaError};

/// Page templates
pub struct Pages {
    env: Environment<'static>,
}

impl Pages {
    pub fn new() -> Self {
        let mut env = Environment::new();

        env.add_template("base.html", include_str!("../templates/base.html"))
            .expect("Failed to add base template");
        env.add_template("unsubscribe.html", include_str!("../templates/unsubscribe.html"))
            .expect("Failed to add unsubscribe template");
        env.add_template("unsubscribed.html", include_str!("../templates/unsubscribed.html"))
            .expect("Failed to add unsubscribed template");
        env.add_template("invalid.html", include_str!("../templates/invalid.html"))
            .expect("Failed to add invalid template");

        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, MiniJinjaError> {
        self.env.get_template(name)?.render(ctx)
    }

    /// Confirmation form posting back to `action`
    pub fn confirm(&self, email: &str, action: &str) -> Result<String, MiniJinjaError> {
        self.render("unsubscribe.html", context! { email => email, action => action })
    }

    pub fn done(&self, email: &str) -> Result<String, MiniJinjaError> {
        self.render("unsubscribed.html", context! { email => email })
    }

    pub fn invalid(&self, message: &str) -> Result<String, MiniJinjaError> {
        self.render("invalid.html", context! { message => message })
    }
}

impl Default for Pages {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_render() {
        let pages = Pages::new();

        let form = pages.confirm("reader@example.com", "/unsubscribe/abc").unwrap();
        assert!(form.contains("reader@example.com"));
        assert!(form.contains(r#"method="post""#));
        assert!(form.contains("abc"));

        let done = pages.done("reader@example.com").unwrap();
        assert!(done.contains("unsubscribed"));

        // values are escaped
        let invalid = pages.invalid("<script>").unwrap();
        assert!(!invalid.contains("<script>"));
    }
}
