//! URL template substitution for DNS profiles
//!
//! Placeholders are replaced in a single left-to-right pass. Substituted
//! text is copied to the output and never scanned again, so a record value
//! that happens to contain `{zone.id}` stays literal. Values are inserted
//! verbatim, without URL encoding.

pub const ZONE_ID: &str = "{zone.id}";
pub const RECORD_NAME: &str = "{record.name}";
pub const RECORD_VALUE: &str = "{record.value}";
pub const DOMAIN_NAME: &str = "{domain.name}";

/// Values available to a template
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub zone_id: &'a str,
    pub record_name: &'a str,
    /// `None` on retraction; substitutes as the empty string
    pub record_value: Option<&'a str>,
    /// `None` leaves `{domain.name}` in place
    pub domain_name: Option<&'a str>,
}

impl<'a> TemplateVars<'a> {
    /// Placeholder at the start of `tail` and its replacement
    fn lookup(&self, tail: &str) -> Option<(usize, &'a str)> {
        let candidates = [
            (ZONE_ID, Some(self.zone_id)),
            (RECORD_NAME, Some(self.record_name)),
            (RECORD_VALUE, Some(self.record_value.unwrap_or(""))),
            (DOMAIN_NAME, self.domain_name),
        ];

        candidates
            .into_iter()
            .find(|(placeholder, _)| tail.starts_with(placeholder))
            .and_then(|(placeholder, value)| value.map(|v| (placeholder.len(), v)))
    }
}

/// Fill `template` with `vars`
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        match vars.lookup(tail) {
            Some((len, value)) => {
                out.push_str(value);
                rest = &tail[len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(value: Option<&'a str>, domain: Option<&'a str>) -> TemplateVars<'a> {
        TemplateVars {
            zone_id: "42",
            record_name: "_acme-challenge.example.com",
            record_value: value,
            domain_name: domain,
        }
    }

    #[test]
    fn test_all_placeholders_replaced() {
        let url = render(
            "https://api.example/{zone.id}/dns/{record.name}?value={record.value}",
            &vars(Some("abc123"), None),
        );

        assert_eq!(
            url,
            "https://api.example/42/dns/_acme-challenge.example.com?value=abc123"
        );
        assert!(!url.contains('{'));
        assert!(!url.contains('}'));
    }

    #[test]
    fn test_substituted_values_not_rescanned() {
        let url = render(
            "https://dns/{record.value}/{zone.id}",
            &vars(Some("{zone.id}"), None),
        );
        assert_eq!(url, "https://dns/{zone.id}/42");
    }

    #[test]
    fn test_domain_name_only_when_given() {
        let template = "https://dns/{domain.name}/{record.name}";
        assert_eq!(
            render(template, &vars(None, Some("example.com"))),
            "https://dns/example.com/_acme-challenge.example.com"
        );
        assert_eq!(
            render(template, &vars(None, None)),
            "https://dns/{domain.name}/_acme-challenge.example.com"
        );
    }

    #[test]
    fn test_retraction_value_is_empty_and_unknown_braces_kept() {
        let url = render(
            "https://dns/{zone.id}/records?content={record.value}&x={other}",
            &vars(None, None),
        );
        assert_eq!(url, "https://dns/42/records?content=&x={other}");
    }

    #[test]
    fn test_repeated_placeholders() {
        let url = render("{zone.id}-{zone.id}{", &vars(None, None));
        assert_eq!(url, "42-42{");
    }
}
