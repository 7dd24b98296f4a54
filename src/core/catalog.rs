//! What the public pages show: catalog filters and the cards built from
//! each collection.

use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::types::{Freebie, Product, Project, Service, SiteSettings, Testimonial};

pub const PLACEHOLDER_IMAGE: &str = "images/doc.jpg";
pub const QUOTE_PRICE: &str = "Sur devis";
pub const DEFAULT_PROJECT_CTA: &str = "Discuter de mon projet";
pub const DEFAULT_PROJECT_CTA_LINK: &str = "commandes.html";
pub const HOME_PROJECT_COUNT: usize = 3;
const MIN_PRICE_CEILING: f64 = 200.0;

/// Reads a free-text price ("120,00 €", "Sur devis") as a number. Anything
/// without a leading number is 0, the value used for quotes.
pub fn parse_price(value: &str) -> f64 {
    let normalised = value
        .chars()
        .filter(|c| *c != '€' && !c.is_whitespace())
        .collect::<String>()
        .replacen(',', ".", 1);
    let digits: String = normalised
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in digits.char_indices() {
        if c == '.' {
            if seen_dot {
                break;
            }
            seen_dot = true;
        }
        end = i + 1;
    }
    digits[..end].parse().unwrap_or(0.0)
}

/// Upper bound of the price slider: the highest price, at least 200,
/// rounded up to a multiple of ten.
pub fn price_ceiling(products: &[Product]) -> f64 {
    let max = products
        .iter()
        .map(|product| parse_price(&product.price))
        .fold(MIN_PRICE_CEILING, f64::max);
    (max / 10.0).ceil() * 10.0
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    PriceAsc,
    PriceDesc,
    Name,
}

impl SortOrder {
    /// Unknown values, such as a select's placeholder, mean no ordering.
    pub fn parse(value: &str) -> Option<Self> {
        <SortOrder as clap::ValueEnum>::from_str(value.trim(), true).ok()
    }
}

/// Shop page filters. `max` and `sort` come straight from form controls, so
/// values that do not parse are ignored instead of rejected.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ProductQuery {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_price")]
    pub max: Option<f64>,
    #[serde(default, deserialize_with = "lenient_sort")]
    pub sort: Option<SortOrder>,
}

fn lenient_price<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|max| max.is_finite()))
}

fn lenient_sort<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SortOrder>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(SortOrder::parse))
}

/// Case and accent insensitive key, so "Écrou" files under E.
fn collation_key(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

pub fn filter_products(products: &[Product], query: &ProductQuery) -> Vec<Product> {
    let search = query
        .search
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();
    let kind = query.kind.as_deref().filter(|kind| *kind != "all" && !kind.is_empty());

    let mut filtered: Vec<Product> = products
        .iter()
        .filter(|product| {
            [&product.name, &product.reference, &product.description]
                .iter()
                .any(|value| !value.is_empty() && value.to_lowercase().contains(&search))
        })
        .filter(|product| kind.map_or(true, |kind| product.kind == kind))
        .filter(|product| {
            let price = parse_price(&product.price);
            query.max.map_or(true, |max| price <= max || price == 0.0)
        })
        .cloned()
        .collect();

    match query.sort {
        Some(SortOrder::PriceAsc) => filtered.sort_by(|a, b| compare_prices(a, b)),
        Some(SortOrder::PriceDesc) => filtered.sort_by(|a, b| compare_prices(b, a)),
        Some(SortOrder::Name) => {
            filtered.sort_by_cached_key(|product| collation_key(&product.name))
        }
        None => {}
    }
    filtered
}

fn compare_prices(a: &Product, b: &Product) -> Ordering {
    parse_price(&a.price).total_cmp(&parse_price(&b.price))
}

#[derive(Serialize)]
struct OrderParams<'a> {
    #[serde(rename = "ref")]
    reference: &'a str,
    name: &'a str,
    price: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

/// Link to the order page, prefilled with the product.
pub fn order_link(product: &Product) -> String {
    let params = OrderParams {
        reference: &product.reference,
        name: &product.name,
        price: &product.price,
        kind: &product.kind,
    };
    match serde_urlencoded::to_string(&params) {
        Ok(query) => format!("order.html?{}", query),
        Err(_) => "order.html".to_string(),
    }
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductCard {
    #[serde(flatten)]
    pub product: Product,
    pub display_price: String,
    pub image_src: String,
    pub order_url: String,
}

impl From<&Product> for ProductCard {
    fn from(product: &Product) -> Self {
        ProductCard {
            display_price: non_empty_or(&product.price, QUOTE_PRICE),
            image_src: non_empty_or(&product.image, PLACEHOLDER_IMAGE),
            order_url: order_link(product),
            product: product.clone(),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub max_price: f64,
    pub products: Vec<ProductCard>,
}

pub fn catalog_page(products: &[Product], query: &ProductQuery) -> CatalogPage {
    CatalogPage {
        max_price: price_ceiling(products),
        products: filter_products(products, query)
            .iter()
            .map(ProductCard::from)
            .collect(),
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct OrderQuery {
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub name: Option<String>,
    pub price: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    #[serde(rename = "ref")]
    pub reference: String,
    pub name: String,
    pub price: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Value of the hidden product field of the order form.
    pub product_line: String,
}

impl From<OrderQuery> for OrderSummary {
    fn from(query: OrderQuery) -> Self {
        let pick = |value: Option<String>, default: &str| {
            value
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let reference = pick(query.reference, "—");
        let name = pick(query.name, "Produit");
        OrderSummary {
            product_line: format!("{} – {}", reference, name),
            price: pick(query.price, QUOTE_PRICE),
            kind: pick(query.kind, "—"),
            reference,
            name,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceVariant {
    Preview,
    #[default]
    Full,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCard {
    pub slug: String,
    pub title: String,
    pub text: String,
    pub price: String,
    pub cta: String,
    pub cta_link: String,
}

pub fn service_cards(
    services: &[Service],
    variant: ServiceVariant,
    limit: Option<usize>,
) -> Vec<ServiceCard> {
    let count = limit.filter(|limit| *limit > 0).unwrap_or(services.len());
    services
        .iter()
        .take(count)
        .map(|service| ServiceCard {
            slug: service.slug.clone(),
            title: service.title.clone(),
            text: match variant {
                ServiceVariant::Preview => service.summary.clone(),
                ServiceVariant::Full => service.details.clone(),
            },
            price: service.price.clone(),
            cta: service.cta.clone(),
            cta_link: service.cta_link.clone(),
        })
        .collect()
}

pub fn home_projects(projects: &[Project]) -> &[Project] {
    &projects[..projects.len().min(HOME_PROJECT_COUNT)]
}

pub fn find_project<'a>(projects: &'a [Project], id: &str) -> Option<&'a Project> {
    projects.iter().find(|project| project.id == id)
}

#[derive(Serialize, Debug, PartialEq)]
pub struct GalleryImage {
    pub src: String,
    pub alt: String,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub description: String,
    pub gallery: Vec<GalleryImage>,
    pub highlights: Vec<String>,
    pub services: Vec<String>,
    pub cta: String,
    pub cta_link: String,
}

impl From<&Project> for ProjectDetail {
    fn from(project: &Project) -> Self {
        let mut gallery: Vec<GalleryImage> = project
            .gallery
            .iter()
            .enumerate()
            .map(|(i, src)| GalleryImage {
                src: src.clone(),
                alt: format!("{} – visuel {}", project.title, i + 1),
            })
            .collect();
        if gallery.is_empty() {
            gallery.push(GalleryImage {
                src: PLACEHOLDER_IMAGE.to_string(),
                alt: project.title.clone(),
            });
        }

        ProjectDetail {
            id: project.id.clone(),
            title: project.title.clone(),
            summary: project.summary.clone(),
            description: project.description.clone(),
            gallery,
            highlights: project.highlights.clone(),
            services: project.services.clone(),
            cta: non_empty_or(&project.cta, DEFAULT_PROJECT_CTA),
            cta_link: non_empty_or(&project.cta_link, DEFAULT_PROJECT_CTA_LINK),
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FreebieCard {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub format: String,
    pub preview: String,
}

impl From<&Freebie> for FreebieCard {
    fn from(freebie: &Freebie) -> Self {
        FreebieCard {
            slug: freebie.slug.clone(),
            title: freebie.title.clone(),
            description: freebie.description.clone(),
            format: freebie.format.clone(),
            preview: non_empty_or(&freebie.preview, PLACEHOLDER_IMAGE),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestimonialFeed {
    pub testimonials: Vec<Testimonial>,
    /// Milliseconds between rotations, absent when nothing rotates.
    pub rotation_interval: Option<u64>,
}

pub fn testimonial_feed(testimonials: Vec<Testimonial>, settings: &SiteSettings) -> TestimonialFeed {
    let rotation_interval = (settings.rotate_testimonials && testimonials.len() > 1)
        .then_some(settings.testimonial_interval);
    TestimonialFeed {
        testimonials,
        rotation_interval,
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
