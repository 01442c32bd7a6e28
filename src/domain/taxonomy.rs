//! Category/subcategory taxonomy.
//!
//! The taxonomy is plain configuration data: upstream query codes, keyword
//! lists used for classification, snapshot file names and product-type
//! aliases. It is built once (from [`Taxonomy::builtin`] or a TOML file) and
//! shared read-only through an `Arc`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::error::TaxonomyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Producao,
    Processamento,
    Comercializacao,
    Importacao,
    Exportacao,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Producao,
        Category::Processamento,
        Category::Comercializacao,
        Category::Importacao,
        Category::Exportacao,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Producao => "producao",
            Category::Processamento => "processamento",
            Category::Comercializacao => "comercializacao",
            Category::Importacao => "importacao",
            Category::Exportacao => "exportacao",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "producao" => Ok(Category::Producao),
            "processamento" => Ok(Category::Processamento),
            "comercializacao" => Ok(Category::Comercializacao),
            "importacao" => Ok(Category::Importacao),
            "exportacao" => Ok(Category::Exportacao),
            other => Err(TaxonomyError::UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryDef {
    pub name: String,
    /// `subopcao` value; `None` when upstream has no separate page.
    #[serde(default)]
    pub upstream_code: Option<String>,
    /// Lowercase keywords matched as substrings of candidate text fields.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub fallback_file: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintMatch {
    #[default]
    Contains,
    Exact,
}

/// Secondary classification rule keyed on a specific field, consulted when
/// no keyword matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldHint {
    pub fields: Vec<String>,
    pub values: Vec<String>,
    #[serde(default)]
    pub mode: HintMatch,
    pub subcategory: String,
}

impl FieldHint {
    /// Compares against the trimmed, lowercased field text.
    pub fn matches(&self, text: &str) -> bool {
        let text = text.trim().to_lowercase();
        match self.mode {
            HintMatch::Contains => self.values.iter().any(|v| text.contains(v.as_str())),
            HintMatch::Exact => self.values.iter().any(|v| text == *v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAlias {
    pub pattern: String,
    pub subcategory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub category: Category,
    /// `opcao` value.
    pub option_code: String,
    pub default_subcategory: String,
    #[serde(default = "default_annotation_key")]
    pub annotation_key: String,
    pub fallback_file: String,
    /// Canonical enumeration order; also the keyword scan order.
    pub subcategories: Vec<SubcategoryDef>,
    #[serde(default)]
    pub field_hints: Vec<FieldHint>,
    #[serde(default)]
    pub product_aliases: Vec<ProductAlias>,
}

fn default_annotation_key() -> String {
    "subcategoria".to_string()
}

impl CategoryDef {
    pub fn subcategory(&self, name: &str) -> Result<&SubcategoryDef, TaxonomyError> {
        self.subcategories
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| TaxonomyError::UnknownSubcategory {
                category: self.category.to_string(),
                subcategory: name.to_string(),
            })
    }

    pub fn subcategory_names(&self) -> impl Iterator<Item = &str> {
        self.subcategories.iter().map(|s| s.name.as_str())
    }

    fn validate(&self) -> Result<(), TaxonomyError> {
        let mut seen = HashSet::new();
        for sub in &self.subcategories {
            if !seen.insert(sub.name.as_str()) {
                return Err(TaxonomyError::Invalid(format!(
                    "duplicate subcategory '{}' in '{}'",
                    sub.name, self.category
                )));
            }
        }

        let check = |name: &str, role: &str| {
            if seen.contains(name) {
                Ok(())
            } else {
                Err(TaxonomyError::Invalid(format!(
                    "{role} '{name}' of '{}' is not a listed subcategory",
                    self.category
                )))
            }
        };

        check(&self.default_subcategory, "default subcategory")?;
        for hint in &self.field_hints {
            check(&hint.subcategory, "field hint target")?;
        }
        for alias in &self.product_aliases {
            check(&alias.subcategory, "product alias target")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    /// Fields whose text is scanned for keywords, in priority order.
    #[serde(default = "default_text_fields")]
    pub text_fields: Vec<String>,
    pub categories: Vec<CategoryDef>,
}

fn default_text_fields() -> Vec<String> {
    [
        "Produto", "produto", "Descrição", "Descricao", "descrição", "descricao", "item", "Item",
        "Nome", "Cultivar", "cultivar",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Taxonomy {
    pub fn from_toml_str(content: &str) -> Result<Self, TaxonomyError> {
        let taxonomy: Taxonomy =
            toml::from_str(content).map_err(|e| TaxonomyError::Invalid(e.to_string()))?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, TaxonomyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TaxonomyError::Invalid(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), TaxonomyError> {
        let mut seen = HashSet::new();
        for def in &self.categories {
            if !seen.insert(def.category) {
                return Err(TaxonomyError::Invalid(format!(
                    "category '{}' defined twice",
                    def.category
                )));
            }
            def.validate()?;
        }
        Ok(())
    }

    pub fn category(&self, category: Category) -> Result<&CategoryDef, TaxonomyError> {
        self.categories
            .iter()
            .find(|d| d.category == category)
            .ok_or_else(|| TaxonomyError::UnknownCategory(category.to_string()))
    }

    /// Upstream query parameters selecting a category page.
    pub fn upstream_params(
        &self,
        category: Category,
        subcategory: Option<&str>,
    ) -> Result<Vec<(String, String)>, TaxonomyError> {
        let def = self.category(category)?;
        let mut params = vec![("opcao".to_string(), def.option_code.clone())];

        if let Some(name) = subcategory
            && let Some(code) = &def.subcategory(name)?.upstream_code
        {
            params.push(("subopcao".to_string(), code.clone()));
        }

        Ok(params)
    }

    /// First alias whose pattern occurs in the product type, case-insensitively.
    pub fn map_product_type(&self, category: Category, product_type: &str) -> Option<String> {
        let needle = product_type.to_lowercase();
        self.category(category)
            .ok()?
            .product_aliases
            .iter()
            .find(|alias| needle.contains(&alias.pattern.to_lowercase()))
            .map(|alias| alias.subcategory.clone())
    }

    /// Canonical subcategory for a user-supplied label: an exact bucket name
    /// (case-insensitive, spaces for underscores), else a product alias.
    pub fn resolve_subcategory(&self, category: Category, label: &str) -> Option<String> {
        let label = label.trim();
        let def = self.category(category).ok()?;
        def.subcategories
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(label) || s.name.replace('_', " ").eq_ignore_ascii_case(label))
            .map(|s| s.name.clone())
            .or_else(|| self.map_product_type(category, label))
    }

    /// Snapshot file for a subcategory, if it has its own.
    pub fn subcategory_file(&self, category: Category, subcategory: &str) -> Option<&str> {
        self.category(category)
            .ok()?
            .subcategory(subcategory)
            .ok()?
            .fallback_file
            .as_deref()
    }

    pub fn default_file(&self, category: Category) -> Option<&str> {
        self.category(category)
            .ok()
            .map(|def| def.fallback_file.as_str())
    }

    /// Taxonomy of the VitiBrasil portal.
    pub fn builtin() -> Self {
        Self {
            text_fields: default_text_fields(),
            categories: vec![
                producao(),
                processamento(),
                comercializacao(),
                importacao(),
                exportacao(),
            ],
        }
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

fn sub(name: &str, code: Option<&str>, keywords: &[&str], file: Option<&str>) -> SubcategoryDef {
    SubcategoryDef {
        name: name.to_string(),
        upstream_code: code.map(str::to_string),
        keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
        fallback_file: file.map(str::to_string),
    }
}

fn aliases(pairs: &[(&str, &str)]) -> Vec<ProductAlias> {
    pairs
        .iter()
        .map(|(pattern, subcategory)| ProductAlias {
            pattern: (*pattern).to_string(),
            subcategory: (*subcategory).to_string(),
        })
        .collect()
}

fn hint(fields: &[&str], values: &[&str], mode: HintMatch, subcategory: &str) -> FieldHint {
    FieldHint {
        fields: fields.iter().map(|f| (*f).to_string()).collect(),
        values: values.iter().map(|v| (*v).to_string()).collect(),
        mode,
        subcategory: subcategory.to_string(),
    }
}

fn producao() -> CategoryDef {
    CategoryDef {
        category: Category::Producao,
        option_code: "opt_02".to_string(),
        default_subcategory: "uvas".to_string(),
        annotation_key: default_annotation_key(),
        fallback_file: "Producao.csv".to_string(),
        subcategories: vec![
            sub(
                "uvas",
                None,
                &["uva", "videira", "parreiral", "cultivar", "vitis", "niágara", "itália", "bordô", "cabernet"],
                None,
            ),
            sub(
                "vinhos",
                None,
                &["vinho", "vinificação", "tinto", "branco", "rosé", "rose", "mesa", "fino"],
                None,
            ),
            sub(
                "sucos",
                None,
                &["suco", "mosto", "integral", "concentrado", "bebida", "néctar"],
                None,
            ),
            sub(
                "derivados",
                None,
                &["derivado", "fermentado", "aguardente", "grappa", "bagaceira", "cooler", "filtrado"],
                None,
            ),
        ],
        field_hints: vec![
            hint(&["Unidade"], &["kg", "ton"], HintMatch::Contains, "uvas"),
            hint(&["Unidade"], &["l", "litro"], HintMatch::Contains, "vinhos"),
        ],
        product_aliases: aliases(&[
            ("vinifera", "uvas"),
            ("americana", "uvas"),
            ("hibrida", "uvas"),
            ("uva", "uvas"),
            ("vinho", "vinhos"),
            ("suco", "sucos"),
            ("derivado", "derivados"),
        ]),
    }
}

fn processamento() -> CategoryDef {
    CategoryDef {
        category: Category::Processamento,
        option_code: "opt_03".to_string(),
        default_subcategory: "semclassificacao".to_string(),
        annotation_key: default_annotation_key(),
        fallback_file: "ProcessaViniferas.csv".to_string(),
        subcategories: vec![
            sub(
                "viniferas",
                Some("subopt_01"),
                &["cabernet", "merlot", "chardonnay", "tannat", "pinot", "sauvignon", "syrah", "viognier", "malbec"],
                Some("ProcessaViniferas.csv"),
            ),
            sub(
                "americanas",
                Some("subopt_02"),
                &["isabel", "bordô", "bordo", "niágara", "niagara", "concord", "jacquez", "herbemont", "seibel"],
                Some("ProcessaAmericanas.csv"),
            ),
            sub(
                "mesa",
                Some("subopt_03"),
                &["italia", "itália", "rubi", "benitaka", "red globe", "thompson"],
                Some("ProcessaMesa.csv"),
            ),
            sub("semclassificacao", Some("subopt_04"), &[], Some("ProcessaSemclass.csv")),
        ],
        field_hints: Vec::new(),
        product_aliases: aliases(&[
            ("vinifera", "viniferas"),
            ("americana", "americanas"),
            ("hibrida", "americanas"),
            ("mesa", "mesa"),
        ]),
    }
}

fn comercializacao() -> CategoryDef {
    CategoryDef {
        category: Category::Comercializacao,
        option_code: "opt_04".to_string(),
        default_subcategory: "varejo".to_string(),
        annotation_key: "canal".to_string(),
        fallback_file: "Comercio.csv".to_string(),
        subcategories: vec![
            sub("varejo", Some("subopt_01"), &["varejo"], None),
            sub("grandes_redes", Some("subopt_02"), &["grandes redes", "rede"], None),
            sub(
                "exportacao_indireta",
                Some("subopt_03"),
                &["exportação indireta", "exportacao indireta"],
                None,
            ),
        ],
        field_hints: Vec::new(),
        product_aliases: aliases(&[
            ("varejo", "varejo"),
            ("grande", "grandes_redes"),
            ("rede", "grandes_redes"),
            ("indireta", "exportacao_indireta"),
        ]),
    }
}

fn importacao() -> CategoryDef {
    CategoryDef {
        category: Category::Importacao,
        option_code: "opt_05".to_string(),
        default_subcategory: "vinhos".to_string(),
        annotation_key: default_annotation_key(),
        fallback_file: "ImpVinhos.csv".to_string(),
        subcategories: vec![
            sub(
                "vinhos",
                Some("subopt_01"),
                &["vinho", "cabernet", "merlot", "chardonnay", "tinto", "branco"],
                Some("ImpVinhos.csv"),
            ),
            sub(
                "espumantes",
                Some("subopt_02"),
                &["espumante", "champagne", "moscatel", "frisante", "prosecco", "brut", "cava"],
                Some("ImpEspumantes.csv"),
            ),
            sub(
                "sucos",
                Some("subopt_05"),
                &["suco", "néctar", "bebida", "concentrado", "integral"],
                Some("ImpSuco.csv"),
            ),
            sub(
                "passas",
                Some("subopt_04"),
                &["passa", "uva passa", "uva seca", "sultana", "raisins"],
                Some("ImpPassas.csv"),
            ),
            sub(
                "frescas",
                Some("subopt_03"),
                &["fresca", "uva fresca", "mesa", "in natura", "thompson", "crimson"],
                Some("ImpFrescas.csv"),
            ),
        ],
        field_hints: vec![
            hint(
                &["País", "Pais", "país", "pais"],
                &["chile", "argentina", "frança", "franca", "portugal", "espanha", "italia", "itália"],
                HintMatch::Exact,
                "vinhos",
            ),
            hint(
                &["País", "Pais", "país", "pais"],
                &["estados unidos", "eua"],
                HintMatch::Exact,
                "frescas",
            ),
        ],
        product_aliases: aliases(&[
            ("fino", "vinhos"),
            ("vinho", "vinhos"),
            ("espumante", "espumantes"),
            ("fresca", "frescas"),
            ("passa", "passas"),
            ("suco", "sucos"),
        ]),
    }
}

fn exportacao() -> CategoryDef {
    CategoryDef {
        category: Category::Exportacao,
        option_code: "opt_06".to_string(),
        default_subcategory: "vinhos".to_string(),
        annotation_key: default_annotation_key(),
        fallback_file: "ExpVinho.csv".to_string(),
        subcategories: vec![
            sub(
                "vinhos",
                Some("subopt_01"),
                &["vinho", "tinto", "branco"],
                Some("ExpVinho.csv"),
            ),
            sub(
                "espumantes",
                Some("subopt_02"),
                &["espumante", "champagne", "moscatel"],
                Some("ExpEspumantes.csv"),
            ),
            sub(
                "uvas",
                Some("subopt_03"),
                &["uva", "fresca", "mesa"],
                Some("ExpUva.csv"),
            ),
            sub("sucos", Some("subopt_04"), &["suco"], Some("ExpSuco.csv")),
        ],
        field_hints: Vec::new(),
        product_aliases: aliases(&[
            ("mesa", "vinhos"),
            ("vinho", "vinhos"),
            ("espumante", "espumantes"),
            ("fresca", "uvas"),
            ("uva", "uvas"),
            ("suco", "sucos"),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_taxonomy_is_valid() {
        let taxonomy = Taxonomy::builtin();
        assert!(taxonomy.validate().is_ok());
        for category in Category::ALL {
            assert!(taxonomy.category(category).is_ok(), "{category} missing");
        }
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Producao".parse::<Category>().unwrap(), Category::Producao);
        assert_eq!(
            "vinhos".parse::<Category>(),
            Err(TaxonomyError::UnknownCategory("vinhos".to_string()))
        );
    }

    #[test]
    fn upstream_params_include_subopcao_only_when_coded() {
        let taxonomy = Taxonomy::builtin();

        let params = taxonomy
            .upstream_params(Category::Processamento, Some("americanas"))
            .unwrap();
        assert_eq!(
            params,
            vec![
                ("opcao".to_string(), "opt_03".to_string()),
                ("subopcao".to_string(), "subopt_02".to_string()),
            ]
        );

        let params = taxonomy
            .upstream_params(Category::Producao, Some("vinhos"))
            .unwrap();
        assert_eq!(params, vec![("opcao".to_string(), "opt_02".to_string())]);
    }

    #[test]
    fn unknown_subcategory_is_rejected() {
        let taxonomy = Taxonomy::builtin();
        let err = taxonomy
            .upstream_params(Category::Exportacao, Some("passas"))
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::UnknownSubcategory { .. }));
    }

    #[test]
    fn product_type_maps_through_aliases() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(
            taxonomy.map_product_type(Category::Importacao, "Espumante Brut"),
            Some("espumantes".to_string())
        );
        assert_eq!(
            taxonomy.map_product_type(Category::Comercializacao, "Grandes Redes"),
            Some("grandes_redes".to_string())
        );
        assert_eq!(taxonomy.map_product_type(Category::Producao, "xyz"), None);
    }

    #[test]
    fn labels_resolve_to_bucket_names() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(
            taxonomy.resolve_subcategory(Category::Comercializacao, "Grandes redes"),
            Some("grandes_redes".to_string())
        );
        assert_eq!(
            taxonomy.resolve_subcategory(Category::Comercializacao, " EXPORTACAO_INDIRETA "),
            Some("exportacao_indireta".to_string())
        );
        assert_eq!(taxonomy.resolve_subcategory(Category::Comercializacao, "supermercados"), None);
    }

    #[test]
    fn taxonomy_loads_from_toml() {
        let content = r#"
            text_fields = ["Produto"]

            [[categories]]
            category = "producao"
            option_code = "opt_02"
            default_subcategory = "uvas"
            fallback_file = "Producao.csv"

            [[categories.subcategories]]
            name = "uvas"
            keywords = ["uva"]

            [[categories.subcategories]]
            name = "vinhos"
            keywords = ["vinho"]
        "#;

        let taxonomy = Taxonomy::from_toml_str(content).unwrap();
        let def = taxonomy.category(Category::Producao).unwrap();
        assert_eq!(def.annotation_key, "subcategoria");
        assert_eq!(def.subcategory_names().collect::<Vec<_>>(), vec!["uvas", "vinhos"]);
        assert!(taxonomy.category(Category::Exportacao).is_err());
    }

    #[test]
    fn toml_with_dangling_default_is_rejected() {
        let content = r#"
            [[categories]]
            category = "producao"
            option_code = "opt_02"
            default_subcategory = "outros"
            fallback_file = "Producao.csv"

            [[categories.subcategories]]
            name = "uvas"
        "#;

        assert!(matches!(
            Taxonomy::from_toml_str(content),
            Err(TaxonomyError::Invalid(_))
        ));
    }
}
