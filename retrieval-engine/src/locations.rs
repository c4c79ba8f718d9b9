/// Spelling-variant expansion for US place names. Registry data stores the
/// same city under several spellings ("ST LOUIS", "ST. LOUIS", "Saint-Louis",
/// "SAINTLOUIS"), so city matching always goes through this table.
#[derive(Debug, Clone)]
pub struct LocationVariants {
    /// Alias groups for the leading token of a city name.
    token_groups: Vec<Vec<String>>,
    /// Alias groups for whole names that abbreviate as a unit.
    name_groups: Vec<Vec<String>>,
}

impl Default for LocationVariants {
    fn default() -> Self {
        Self {
            token_groups: vec![
                vec!["saint".into(), "st".into()],
                vec!["fort".into(), "ft".into()],
                vec!["mount".into(), "mt".into()],
            ],
            name_groups: vec![vec!["new york".into(), "ny".into(), "nyc".into()]],
        }
    }
}

impl LocationVariants {
    /// Registers an additional leading-token alias group.
    pub fn with_token_group(mut self, aliases: Vec<String>) -> Self {
        self.token_groups
            .push(aliases.into_iter().map(|a| normalize(&a)).collect());
        self
    }

    /// Registers an additional whole-name alias group.
    pub fn with_name_group(mut self, aliases: Vec<String>) -> Self {
        self.name_groups
            .push(aliases.into_iter().map(|a| normalize(&a)).collect());
        self
    }

    /// Expands a city name into every normalized spelling the registry might
    /// hold for it, including space-collapsed forms. Unknown names expand to
    /// their own normalized form.
    pub fn expand(&self, city: &str) -> Vec<String> {
        let norm = normalize(city);
        if norm.is_empty() {
            return Vec::new();
        }

        let mut spaced_forms = vec![norm.clone()];

        for group in &self.name_groups {
            if group.iter().any(|alias| *alias == norm) {
                for alias in group {
                    push_unique(&mut spaced_forms, alias.clone());
                }
            }
        }

        let tokens: Vec<&str> = norm.split(' ').collect();
        if let Some((first, rest)) = tokens.split_first() {
            for group in &self.token_groups {
                if group.iter().any(|alias| alias == first) {
                    for alias in group {
                        let mut form = alias.clone();
                        for token in rest {
                            form.push(' ');
                            form.push_str(token);
                        }
                        push_unique(&mut spaced_forms, form);
                    }
                }
            }

            // A collapsed single-token input ("saintlouis") still expands if
            // it starts with a known alias.
            if rest.is_empty() {
                for group in &self.token_groups {
                    for alias in group {
                        if let Some(tail) = first.strip_prefix(alias.as_str()) {
                            if tail.len() >= 3 {
                                let split_form = format!("{alias} {tail}");
                                let expanded = self.expand(&split_form);
                                for form in expanded {
                                    push_unique(&mut spaced_forms, form);
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut variants = Vec::new();
        for form in spaced_forms {
            let collapsed = form.replace(' ', "");
            push_unique(&mut variants, form);
            push_unique(&mut variants, collapsed);
        }
        variants
    }

    /// Whether a stored city value names the same place as the query city.
    pub fn matches(&self, stored: &str, query_city: &str) -> bool {
        let stored_norm = normalize(stored);
        if stored_norm.is_empty() {
            return false;
        }
        let stored_collapsed = stored_norm.replace(' ', "");
        self.expand(query_city)
            .iter()
            .any(|variant| *variant == stored_norm || *variant == stored_collapsed)
    }
}

/// Lowercases, strips periods, treats hyphens as spaces, collapses runs of
/// whitespace.
pub fn normalize(value: &str) -> String {
    let lowered = value.to_ascii_lowercase().replace('.', "").replace('-', " ");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_unique(forms: &mut Vec<String>, candidate: String) {
    if !candidate.is_empty() && !forms.contains(&candidate) {
        forms.push(candidate);
    }
}
