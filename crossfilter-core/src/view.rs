//! Views: scalar counts, histograms and heatmaps over configured dimensions

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::aggregate::AggregateShape;
use crate::dimension::{Dimension, DimensionConfig};
use crate::error::{CrossfilterError, CrossfilterResult};

/// Stable identity of a configured view (its position in the registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewId(pub usize);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// View type as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Scalar,
    Univariate,
    Bivariate,
}

impl ViewKind {
    fn arity(self) -> usize {
        match self {
            ViewKind::Scalar => 0,
            ViewKind::Univariate => 1,
            ViewKind::Bivariate => 2,
        }
    }
}

/// Declarative view definition as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(rename = "type")]
    pub kind: ViewKind,

    pub title: String,

    /// Dimension names, in X then Y order
    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Rendered width in pixels, used as cube resolution when this view is active
    #[serde(default)]
    pub width: Option<usize>,
}

/// A configured view. The variant fixes the aggregate shape.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Scalar {
        id: ViewId,
        title: String,
    },
    Univariate {
        id: ViewId,
        title: String,
        dimension: Arc<Dimension>,
        width: usize,
    },
    Bivariate {
        id: ViewId,
        title: String,
        x: Arc<Dimension>,
        y: Arc<Dimension>,
        width: usize,
    },
}

impl View {
    pub fn id(&self) -> ViewId {
        match self {
            View::Scalar { id, .. } | View::Univariate { id, .. } | View::Bivariate { id, .. } => {
                *id
            }
        }
    }

    pub fn title(&self) -> &str {
        match self {
            View::Scalar { title, .. }
            | View::Univariate { title, .. }
            | View::Bivariate { title, .. } => title,
        }
    }

    pub fn kind(&self) -> ViewKind {
        match self {
            View::Scalar { .. } => ViewKind::Scalar,
            View::Univariate { .. } => ViewKind::Univariate,
            View::Bivariate { .. } => ViewKind::Bivariate,
        }
    }

    /// Pixel width, `None` for scalar views
    pub fn width(&self) -> Option<usize> {
        match self {
            View::Scalar { .. } => None,
            View::Univariate { width, .. } | View::Bivariate { width, .. } => Some(*width),
        }
    }

    pub fn dimensions(&self) -> Vec<&Dimension> {
        match self {
            View::Scalar { .. } => Vec::new(),
            View::Univariate { dimension, .. } => vec![dimension.as_ref()],
            View::Bivariate { x, y, .. } => vec![x.as_ref(), y.as_ref()],
        }
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.dimensions().into_iter().map(Dimension::name).collect()
    }

    pub fn uses_dimension(&self, name: &str) -> bool {
        self.dimensions().iter().any(|d| d.name() == name)
    }

    /// Shape of this view's aggregate (and of each of its cube slices)
    pub fn shape(&self) -> AggregateShape {
        match self {
            View::Scalar { .. } => AggregateShape::Scalar,
            View::Univariate { dimension, .. } => AggregateShape::Bins(dimension.bin_count()),
            View::Bivariate { x, y, .. } => AggregateShape::Grid {
                x: x.bin_count(),
                y: y.bin_count(),
            },
        }
    }
}

/// Dimensions and views fixed at configuration time
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    dimensions: HashMap<String, Arc<Dimension>>,
    views: Vec<View>,
}

impl ViewRegistry {
    /// Validate and build the registry. Any invalid definition is a configuration error.
    pub fn from_config(
        dimensions: &[DimensionConfig],
        views: &[ViewConfig],
        default_width: usize,
    ) -> CrossfilterResult<Self> {
        if default_width == 0 {
            return Err(CrossfilterError::configuration(
                "Default view width must be greater than 0",
            ));
        }

        let mut by_name = HashMap::with_capacity(dimensions.len());
        for config in dimensions {
            let dimension = Dimension::from_config(config)?;
            if by_name
                .insert(config.name.clone(), Arc::new(dimension))
                .is_some()
            {
                return Err(CrossfilterError::configuration(format!(
                    "Duplicate dimension '{}'",
                    config.name
                )));
            }
        }

        let mut built = Vec::with_capacity(views.len());
        for (index, config) in views.iter().enumerate() {
            built.push(Self::build_view(ViewId(index), config, &by_name, default_width)?);
        }

        Ok(Self {
            dimensions: by_name,
            views: built,
        })
    }

    fn build_view(
        id: ViewId,
        config: &ViewConfig,
        dimensions: &HashMap<String, Arc<Dimension>>,
        default_width: usize,
    ) -> CrossfilterResult<View> {
        if config.dimensions.len() != config.kind.arity() {
            return Err(CrossfilterError::configuration(format!(
                "View '{}' of type {:?} needs {} dimension(s), got {}",
                config.title,
                config.kind,
                config.kind.arity(),
                config.dimensions.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(config.dimensions.len());
        for name in &config.dimensions {
            if !seen.insert(name.as_str()) {
                return Err(CrossfilterError::configuration(format!(
                    "View '{}' uses dimension '{}' twice",
                    config.title, name
                )));
            }
            let dimension = dimensions.get(name).ok_or_else(|| {
                CrossfilterError::configuration(format!(
                    "View '{}' references unknown dimension '{}'",
                    config.title, name
                ))
            })?;
            resolved.push(dimension.clone());
        }

        let width = match config.width {
            Some(0) => {
                return Err(CrossfilterError::configuration(format!(
                    "View '{}' width must be greater than 0",
                    config.title
                )))
            }
            Some(width) => width,
            None => default_width,
        };

        let title = config.title.clone();
        let view = match config.kind {
            ViewKind::Scalar => View::Scalar { id, title },
            ViewKind::Univariate => View::Univariate {
                id,
                title,
                dimension: resolved[0].clone(),
                width,
            },
            ViewKind::Bivariate => View::Bivariate {
                id,
                title,
                x: resolved[0].clone(),
                y: resolved[1].clone(),
                width,
            },
        };
        Ok(view)
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(id.0)
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn dimension(&self, name: &str) -> Option<&Arc<Dimension>> {
        self.dimensions.get(name)
    }

    /// Every view except `active`
    pub fn passive_views(&self, active: ViewId) -> impl Iterator<Item = &View> {
        self.views.iter().filter(move |view| view.id() != active)
    }

    /// Views that aggregate over the named dimension
    pub fn views_on<'a>(&'a self, dimension: &'a str) -> impl Iterator<Item = &'a View> + 'a {
        self.views
            .iter()
            .filter(move |view| view.uses_dimension(dimension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Vec<DimensionConfig> {
        vec![
            DimensionConfig {
                name: "ARR_DELAY".to_string(),
                extent: [-10.0, 100.0],
                bins: 22,
                format: None,
            },
            DimensionConfig {
                name: "DISTANCE".to_string(),
                extent: [50.0, 2000.0],
                bins: 25,
                format: Some(".0f".to_string()),
            },
        ]
    }

    #[test]
    fn test_registry_from_json_config() {
        let views: Vec<ViewConfig> = serde_json::from_str(
            r#"[
                {"type": "scalar", "title": "Flights"},
                {"type": "univariate", "title": "Arrival delay", "dimensions": ["ARR_DELAY"], "width": 500},
                {"type": "bivariate", "title": "Delay vs distance", "dimensions": ["ARR_DELAY", "DISTANCE"]}
            ]"#,
        )
        .unwrap();

        let registry = ViewRegistry::from_config(&dims(), &views, 400).unwrap();
        assert_eq!(registry.views().len(), 3);

        let hist = registry.view(ViewId(1)).unwrap();
        assert_eq!(hist.width(), Some(500));
        assert_eq!(hist.shape(), AggregateShape::Bins(22));

        let heat = registry.view(ViewId(2)).unwrap();
        assert_eq!(heat.width(), Some(400));
        assert_eq!(heat.shape(), AggregateShape::Grid { x: 22, y: 25 });
        assert_eq!(heat.dimension_names(), vec!["ARR_DELAY", "DISTANCE"]);

        assert_eq!(registry.passive_views(ViewId(1)).count(), 2);
        assert_eq!(registry.views_on("DISTANCE").count(), 1);
    }

    #[test]
    fn test_registry_rejects_bad_views() {
        let unknown = vec![ViewConfig {
            kind: ViewKind::Univariate,
            title: "Missing".to_string(),
            dimensions: vec!["AIR_TIME".to_string()],
            width: None,
        }];
        assert!(matches!(
            ViewRegistry::from_config(&dims(), &unknown, 400),
            Err(CrossfilterError::Configuration(_))
        ));

        let arity = vec![ViewConfig {
            kind: ViewKind::Bivariate,
            title: "Half a heatmap".to_string(),
            dimensions: vec!["ARR_DELAY".to_string()],
            width: None,
        }];
        assert!(ViewRegistry::from_config(&dims(), &arity, 400).is_err());

        let mut duplicated = dims();
        duplicated.push(duplicated[0].clone());
        assert!(ViewRegistry::from_config(&duplicated, &[], 400).is_err());
    }
}
