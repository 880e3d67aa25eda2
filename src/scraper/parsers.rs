use crate::models::{CatalogLink, CategoryMap, FieldValue, SpecRecord};
use anyhow::Result;
use indexmap::IndexMap;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

/// Collapse runs of whitespace to single spaces.
fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// Compiled selectors for search-result and detail pages.
pub struct PageParser {
    maker_link: Selector,
    title: Selector,
    specs_block: Selector,
    table: Selector,
    row: Selector,
    category_header: Selector,
    label_cell: Selector,
    value_cell: Selector,
}

impl PageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            maker_link: selector("div.makers a[href]")?,
            title: selector("h1.specs-phone-name-title")?,
            specs_block: selector("div#specs-list")?,
            table: selector("table")?,
            row: selector("tr")?,
            category_header: selector("th")?,
            label_cell: selector("td.ttl")?,
            value_cell: selector("td.nfo")?,
        })
    }

    // ── Search-result page ────────────────────────────────────────────────────

    /// Absolute detail-page URLs in page order. Duplicates are kept.
    pub fn parse_links(&self, html: &str, base: &Url) -> Vec<CatalogLink> {
        let doc = Html::parse_document(html);
        doc.select(&self.maker_link)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| match base.join(href) {
                Ok(url) => Some(CatalogLink(url.to_string())),
                Err(e) => {
                    debug!("Dropping unresolvable href {:?}: {}", href, e);
                    None
                }
            })
            .collect()
    }

    // ── Detail page ───────────────────────────────────────────────────────────

    /// `None` when the page has no title or no specification block, or the
    /// title is blank.
    pub fn parse_detail(&self, html: &str) -> Option<SpecRecord> {
        let doc = Html::parse_document(html);
        let name = element_text(doc.select(&self.title).next()?).trim().to_string();
        let specs = doc.select(&self.specs_block).next()?;
        if name.is_empty() {
            return None;
        }
        Some(SpecRecord::new(name, self.parse_spec_tables(specs)))
    }

    /// Turn a specification block into category → key → value.
    ///
    /// A `th` carrying `rowspan` opens its category (reopening an existing one
    /// keeps what it already holds). `td.nfo` cells contribute to the open
    /// category, keyed by their `data-spec` attribute or else the `td.ttl`
    /// label. Value rows seen before any category opens are dropped.
    pub fn parse_spec_tables(&self, block: ElementRef<'_>) -> IndexMap<String, CategoryMap> {
        let mut categories: IndexMap<String, CategoryMap> = IndexMap::new();
        let mut current: Option<String> = None;

        for table in block.select(&self.table) {
            for row in table.select(&self.row) {
                if let Some(th) = row.select(&self.category_header).next() {
                    if th.value().attr("rowspan").is_some() {
                        let name = element_text(th).trim().to_string();
                        // A header naming an existing category continues it;
                        // fields already collected under that name are kept.
                        categories.entry(name.clone()).or_default();
                        current = Some(name);
                    }
                }

                let Some(value_cell) = row.select(&self.value_cell).next() else {
                    continue;
                };
                let Some(category) = current.as_ref() else {
                    continue;
                };

                let key = value_cell
                    .value()
                    .attr("data-spec")
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .or_else(|| {
                        row.select(&self.label_cell)
                            .next()
                            .map(|ttl| element_text(ttl).trim().to_string())
                            .filter(|k| !k.is_empty())
                    });
                let Some(key) = key else { continue };

                let value = squash(&element_text(value_cell));
                let fields = categories.entry(category.clone()).or_default();
                match fields.get_mut(&key) {
                    Some(existing) => existing.coalesce(value),
                    None => {
                        fields.insert(key, FieldValue::Scalar(value));
                    }
                }
            }
        }

        categories
    }

    #[cfg(test)]
    fn parse_spec_fragment(&self, html: &str) -> IndexMap<String, CategoryMap> {
        let doc = Html::parse_fragment(html);
        doc.select(&self.specs_block)
            .next()
            .map(|block| self.parse_spec_tables(block))
            .unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &str = r##"
        <html><body>
        <h1 class="specs-phone-name-title"> Acme Phone 12 </h1>
        <div id="specs-list">
          <table>
            <tr><td class="ttl">Orphan</td><td class="nfo">dropped</td></tr>
          </table>
          <table>
            <tr><th rowspan="3" scope="row">Platform</th>
                <td class="ttl"><a href="#">Chipset</a></td>
                <td class="nfo" data-spec="chipset">Snapdragon  8 Gen 3
                   (4 nm)</td></tr>
            <tr><td class="ttl">CPU</td><td class="nfo" data-spec="cpu">Octa-core</td></tr>
            <tr><td class="ttl">&nbsp;</td><td class="nfo" data-spec="cpu">1x3.3 GHz</td></tr>
          </table>
          <table>
            <tr><th rowspan="2">Battery</th>
                <td class="ttl">Type</td><td class="nfo" data-spec="batdescription1">Li-Ion 5000 mAh</td></tr>
            <tr><td class="ttl">Charging</td><td class="nfo">45W wired</td></tr>
          </table>
        </div>
        </body></html>"##;

    #[test]
    fn test_parse_detail_categories() {
        let parser = PageParser::new().unwrap();
        let rec = parser.parse_detail(DETAIL).unwrap();
        assert_eq!(rec.name, "Acme Phone 12");
        assert_eq!(rec.categories.keys().collect::<Vec<_>>(), vec!["Platform", "Battery"]);

        let platform = &rec.categories["Platform"];
        assert_eq!(
            platform["chipset"],
            FieldValue::Scalar("Snapdragon 8 Gen 3 (4 nm)".into())
        );
        assert_eq!(
            platform["cpu"],
            FieldValue::List(vec!["Octa-core".into(), "1x3.3 GHz".into()])
        );
        // label text is the fallback key
        assert_eq!(
            rec.categories["Battery"]["Charging"],
            FieldValue::Scalar("45W wired".into())
        );
    }

    #[test]
    fn test_value_row_without_category_is_dropped() {
        let parser = PageParser::new().unwrap();
        let rec = parser.parse_detail(DETAIL).unwrap();
        assert!(rec.categories.values().all(|c| !c.contains_key("Orphan")));
    }

    #[test]
    fn test_repeated_key_coalesces() {
        let parser = PageParser::new().unwrap();
        let cats = parser.parse_spec_fragment(
            r#"<div id="specs-list"><table>
                 <tr><th rowspan="2">Misc</th><td class="ttl">K</td><td class="nfo">v1</td></tr>
                 <tr><td class="ttl">K</td><td class="nfo">v2</td></tr>
               </table></div>"#,
        );
        assert_eq!(
            cats["Misc"]["K"],
            FieldValue::List(vec!["v1".into(), "v2".into()])
        );
    }

    #[test]
    fn test_reopened_category_keeps_earlier_fields() {
        let parser = PageParser::new().unwrap();
        let cats = parser.parse_spec_fragment(
            r#"<div id="specs-list">
                 <table><tr><th rowspan="1">Misc</th><td class="ttl">Colors</td><td class="nfo">Black</td></tr></table>
                 <table><tr><th rowspan="1">Body</th><td class="ttl">Weight</td><td class="nfo">190 g</td></tr></table>
                 <table><tr><th rowspan="1">Misc</th><td class="ttl">Price</td><td class="nfo">$ 499</td></tr></table>
               </div>"#,
        );
        assert_eq!(cats.keys().collect::<Vec<_>>(), vec!["Misc", "Body"]);
        assert_eq!(cats["Misc"]["Colors"], FieldValue::Scalar("Black".into()));
        assert_eq!(cats["Misc"]["Price"], FieldValue::Scalar("$ 499".into()));
    }

    #[test]
    fn test_missing_specs_block_is_not_a_record() {
        let parser = PageParser::new().unwrap();
        let html = r#"<h1 class="specs-phone-name-title">Acme</h1><p>nothing</p>"#;
        assert!(parser.parse_detail(html).is_none());
        let html = r#"<div id="specs-list"><table></table></div>"#;
        assert!(parser.parse_detail(html).is_none());
    }

    #[test]
    fn test_parse_links_resolves_against_base() {
        let parser = PageParser::new().unwrap();
        let base = Url::parse("https://www.gsmarena.com").unwrap();
        let html = r#"<div class="makers"><ul>
            <li><a href="acme_phone_12-1234.php">A</a></li>
            <li><a href="/acme_phone_13-1235.php">B</a></li>
            <li><a href="acme_phone_12-1234.php">A again</a></li>
          </ul></div>
          <a href="elsewhere.php">not a maker link</a>"#;
        let links = parser.parse_links(html, &base);
        assert_eq!(
            links,
            vec![
                CatalogLink("https://www.gsmarena.com/acme_phone_12-1234.php".into()),
                CatalogLink("https://www.gsmarena.com/acme_phone_13-1235.php".into()),
                CatalogLink("https://www.gsmarena.com/acme_phone_12-1234.php".into()),
            ]
        );
    }
}
