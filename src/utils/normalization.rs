//! Normalização de strings para filtros e ordenação
//!
//! Comparações de texto no dashboard ignoram acentos e caixa, de forma que
//! "João" e "joao" sejam equivalentes e "Ângela" ordene junto de "Angela".

use std::cmp::Ordering;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Remove acentos (NFKD + descarte de marcas combinantes), converte para
/// lowercase e colapsa espaços.
///
/// # Exemplos
/// ```
/// use alsham_analytics::utils::normalization::normalize_string;
///
/// assert_eq!(normalize_string("  João   Silva "), "joao silva");
/// assert_eq!(normalize_string("PROPOSTA"), "proposta");
/// ```
pub fn normalize_string(input: &str) -> String {
    input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comparação "locale-aware" aproximada: primeiro sem acentos/caixa,
/// depois pelo texto original para manter a ordem total.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    normalize_string(a)
        .cmp(&normalize_string(b))
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_removes_accents_and_case() {
        assert_eq!(normalize_string("Negociação"), "negociacao");
        assert_eq!(normalize_string("  Ângela   Souza  "), "angela souza");
        assert_eq!(normalize_string(""), "");
    }

    #[test]
    fn test_locale_compare_ignores_accents() {
        assert_eq!(locale_compare("Ângela", "Bruno"), Ordering::Less);
        assert_eq!(locale_compare("bruno", "Ângela"), Ordering::Greater);
        assert_eq!(locale_compare("ana", "ana"), Ordering::Equal);
        assert_ne!(locale_compare("Ana", "ana"), Ordering::Equal);
    }
}
