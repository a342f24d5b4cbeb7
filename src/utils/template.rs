//! `{{name}}` placeholder rendering.

use std::collections::HashMap;

pub struct TemplateVars;

impl TemplateVars {
    pub const VERSION: &'static str = "version";
    pub const BRANCH: &'static str = "branch";
    pub const REVISION: &'static str = "revision";
    pub const BUILD_NUMBER: &'static str = "buildNumber";
}

pub fn render_map(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_placeholders_and_leaves_others() {
        let mut vars = HashMap::new();
        vars.insert(TemplateVars::VERSION.to_string(), "42-abc1234".to_string());

        let rendered = render_map("docker build -t web:{{version}} {{unknown}}", &vars);

        assert_eq!(rendered, "docker build -t web:42-abc1234 {{unknown}}");
    }
}
