use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    core::data::{Slot, Workspace},
    error::AppError,
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Products,
    Projects,
    Freebies,
    Services,
    Testimonials,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Products,
        Collection::Projects,
        Collection::Freebies,
        Collection::Services,
        Collection::Testimonials,
        Collection::Settings,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Projects => "projects",
            Collection::Freebies => "freebies",
            Collection::Services => "services",
            Collection::Testimonials => "testimonials",
            Collection::Settings => "settings",
        }
    }

    /// Location of the collection file, both in the hosted repository and
    /// under the public site root.
    pub fn path(self) -> &'static str {
        match self {
            Collection::Products => "data/products.json",
            Collection::Projects => "data/projects.json",
            Collection::Freebies => "data/freebies.json",
            Collection::Services => "data/services.json",
            Collection::Testimonials => "data/testimonials.json",
            Collection::Settings => "data/settings.json",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|collection| collection.name() == value)
            .ok_or_else(|| AppError::NotFound(format!("collection \"{}\"", value)))
    }
}

/// A record stored as one element of a collection array.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn slot(workspace: &Workspace) -> &Slot<Vec<Self>>;

    /// Trims every text field and drops empty list entries.
    fn normalize(&mut self);

    fn validate(&self) -> Result<(), AppError>;

    fn label(&self) -> &str;

    /// Identifier that site settings may point at.
    fn featured_key(&self) -> Option<&str> {
        None
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Product {
    #[serde(rename = "ref")]
    pub reference: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub price: String,
    pub description: String,
    pub image: String,
    pub link: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub thumbnail: String,
    pub description: String,
    pub highlights: Vec<String>,
    pub services: Vec<String>,
    pub gallery: Vec<String>,
    pub cta: String,
    pub cta_link: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Freebie {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub format: String,
    pub preview: String,
    pub file: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Service {
    pub slug: String,
    pub title: String,
    pub icon: String,
    pub tagline: String,
    pub summary: String,
    pub details: String,
    pub price: String,
    pub turnaround: String,
    pub deliverables: Vec<String>,
    pub tools: Vec<String>,
    pub image: String,
    pub cta: String,
    pub cta_link: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Testimonial {
    pub quote: String,
    pub author: String,
    pub role: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteSettings {
    pub featured_project: Option<String>,
    pub rotate_testimonials: bool,
    /// Milliseconds between two testimonials.
    pub testimonial_interval: u64,
}

impl Default for SiteSettings {
    fn default() -> Self {
        SiteSettings {
            featured_project: None,
            rotate_testimonials: true,
            testimonial_interval: 6000,
        }
    }
}

impl SiteSettings {
    pub fn normalize(&mut self) {
        if let Some(id) = self.featured_project.as_mut() {
            trim(id);
        }
        if self.featured_project.as_deref() == Some("") {
            self.featured_project = None;
        }
    }

    /// Clears the featured reference when it names none of `projects`.
    pub fn reconcile(&mut self, projects: &[Project]) -> bool {
        match self.featured_project.as_deref() {
            Some(id) if !projects.iter().any(|project| project.id == id) => {
                self.featured_project = None;
                true
            }
            _ => false,
        }
    }

    /// Clears the featured reference if it points at `project_id`.
    pub fn release(&mut self, project_id: &str) -> bool {
        if self.featured_project.as_deref() == Some(project_id) {
            self.featured_project = None;
            true
        } else {
            false
        }
    }
}

impl Record for Product {
    const COLLECTION: Collection = Collection::Products;

    fn slot(workspace: &Workspace) -> &Slot<Vec<Self>> {
        &workspace.products
    }

    fn normalize(&mut self) {
        for field in [
            &mut self.reference,
            &mut self.name,
            &mut self.kind,
            &mut self.price,
            &mut self.description,
            &mut self.image,
            &mut self.link,
        ] {
            trim(field);
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        require(
            &[self.reference.as_str(), self.name.as_str(), self.description.as_str()],
            "Reference, name and description are required.",
        )
    }

    fn label(&self) -> &str {
        &self.name
    }
}

impl Record for Project {
    const COLLECTION: Collection = Collection::Projects;

    fn slot(workspace: &Workspace) -> &Slot<Vec<Self>> {
        &workspace.projects
    }

    fn normalize(&mut self) {
        for field in [
            &mut self.id,
            &mut self.title,
            &mut self.summary,
            &mut self.thumbnail,
            &mut self.description,
            &mut self.cta,
            &mut self.cta_link,
        ] {
            trim(field);
        }
        clean_list(&mut self.highlights);
        clean_list(&mut self.services);
        clean_list(&mut self.gallery);
    }

    fn validate(&self) -> Result<(), AppError> {
        require(
            &[self.id.as_str(), self.title.as_str(), self.description.as_str()],
            "Identifier, title and description are required.",
        )
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn featured_key(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl Record for Freebie {
    const COLLECTION: Collection = Collection::Freebies;

    fn slot(workspace: &Workspace) -> &Slot<Vec<Self>> {
        &workspace.freebies
    }

    fn normalize(&mut self) {
        for field in [
            &mut self.slug,
            &mut self.title,
            &mut self.description,
            &mut self.format,
            &mut self.preview,
            &mut self.file,
        ] {
            trim(field);
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        require(
            &[self.slug.as_str(), self.title.as_str(), self.file.as_str()],
            "Slug, title and file are required.",
        )
    }

    fn label(&self) -> &str {
        &self.title
    }
}

impl Record for Service {
    const COLLECTION: Collection = Collection::Services;

    fn slot(workspace: &Workspace) -> &Slot<Vec<Self>> {
        &workspace.services
    }

    fn normalize(&mut self) {
        for field in [
            &mut self.slug,
            &mut self.title,
            &mut self.icon,
            &mut self.tagline,
            &mut self.summary,
            &mut self.details,
            &mut self.price,
            &mut self.turnaround,
            &mut self.image,
            &mut self.cta,
            &mut self.cta_link,
        ] {
            trim(field);
        }
        clean_list(&mut self.deliverables);
        clean_list(&mut self.tools);
    }

    fn validate(&self) -> Result<(), AppError> {
        require(
            &[self.slug.as_str(), self.title.as_str(), self.summary.as_str()],
            "Slug, title and summary are required.",
        )
    }

    fn label(&self) -> &str {
        &self.title
    }
}

impl Record for Testimonial {
    const COLLECTION: Collection = Collection::Testimonials;

    fn slot(workspace: &Workspace) -> &Slot<Vec<Self>> {
        &workspace.testimonials
    }

    fn normalize(&mut self) {
        for field in [&mut self.quote, &mut self.author, &mut self.role] {
            trim(field);
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        require(&[self.quote.as_str(), self.author.as_str()], "Quote and author are required.")
    }

    fn label(&self) -> &str {
        &self.author
    }
}

fn trim(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn clean_list(values: &mut Vec<String>) {
    values.iter_mut().for_each(trim);
    values.retain(|value| !value.is_empty());
}

fn require(values: &[&str], message: &str) -> Result<(), AppError> {
    if values.iter().any(|value| value.is_empty()) {
        Err(AppError::Validation(message.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            title: format!("Project {}", id),
            description: "Restoration".to_string(),
            ..Project::default()
        }
    }

    #[test]
    fn product_requires_reference_name_and_description() {
        let mut product = Product {
            reference: "  ".to_string(),
            name: "Support".to_string(),
            description: "Wall mount".to_string(),
            ..Product::default()
        };
        product.normalize();
        let error = product.validate().unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        assert_eq!(
            error.to_string(),
            "Reference, name and description are required."
        );
    }

    #[test]
    fn normalize_trims_fields_and_drops_empty_entries() {
        let mut project = Project {
            id: " atelier ".to_string(),
            highlights: vec![" first ".to_string(), "".to_string(), "  ".to_string()],
            gallery: vec!["images/a.jpg".to_string(), " ".to_string()],
            ..Project::default()
        };
        project.normalize();
        assert_eq!(project.id, "atelier");
        assert_eq!(project.highlights, vec!["first"]);
        assert_eq!(project.gallery, vec!["images/a.jpg"]);
    }

    #[test]
    fn product_keeps_wire_field_names() {
        let product: Product = serde_json::from_str(
            r#"{"ref":"P-01","name":"Clip","type":"STL","price":"4,50 €"}"#,
        )
        .unwrap();
        assert_eq!(product.reference, "P-01");
        assert_eq!(product.kind, "STL");
        assert!(product.description.is_empty());

        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["ref"], "P-01");
        assert_eq!(value["type"], "STL");
    }

    #[test]
    fn project_uses_camel_case_cta_link() {
        let value = serde_json::to_value(Project {
            cta_link: "commandes.html".to_string(),
            ..project("p1")
        })
        .unwrap();
        assert_eq!(value["ctaLink"], "commandes.html");
    }

    #[test]
    fn reconcile_clears_missing_featured_project() {
        let mut settings = SiteSettings {
            featured_project: Some("gone".to_string()),
            ..SiteSettings::default()
        };
        assert!(settings.reconcile(&[project("p1"), project("p2")]));
        assert_eq!(settings.featured_project, None);

        settings.featured_project = Some("p2".to_string());
        assert!(!settings.reconcile(&[project("p1"), project("p2")]));
        assert_eq!(settings.featured_project.as_deref(), Some("p2"));
    }

    #[test]
    fn release_only_clears_matching_project() {
        let mut settings = SiteSettings {
            featured_project: Some("p1".to_string()),
            ..SiteSettings::default()
        };
        assert!(!settings.release("p2"));
        assert!(settings.release("p1"));
        assert_eq!(settings.featured_project, None);
    }

    #[test]
    fn blank_featured_project_normalizes_to_none() {
        let mut settings: SiteSettings =
            serde_json::from_str(r#"{"featuredProject":"  "}"#).unwrap();
        settings.normalize();
        assert_eq!(settings.featured_project, None);
        assert_eq!(settings.testimonial_interval, 6000);
    }

    #[test]
    fn collection_names_parse_back() {
        for collection in Collection::ALL {
            assert_eq!(collection.name().parse::<Collection>().unwrap(), collection);
        }
        assert!("orders".parse::<Collection>().is_err());
    }
}
