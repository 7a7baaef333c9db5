//! Job matrix - Cartesian expansion over named axes

use std::collections::BTreeMap;

/// One concrete assignment of matrix axes to values
pub type MatrixCombination = BTreeMap<String, String>;

/// Matrix of parameter combinations for a job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    /// Axes in declaration order
    axes: Vec<(String, Vec<String>)>,

    /// Extra combinations appended after expansion
    include: Vec<MatrixCombination>,

    /// Partial combinations removed from the product
    exclude: Vec<MatrixCombination>,
}

impl Matrix {
    pub fn new(axes: Vec<(String, Vec<String>)>) -> Self {
        Self {
            axes,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn with_include(mut self, include: Vec<MatrixCombination>) -> Self {
        self.include = include;
        self
    }

    pub fn with_exclude(mut self, exclude: Vec<MatrixCombination>) -> Self {
        self.exclude = exclude;
        self
    }

    /// Expand into concrete combinations
    ///
    /// The first axis varies slowest. An empty matrix yields a single empty
    /// combination so that a job without a matrix still runs once.
    pub fn expand(&self) -> Vec<MatrixCombination> {
        if self.axes.is_empty() && !self.include.is_empty() {
            return self.include.clone();
        }

        let mut combinations = vec![MatrixCombination::new()];
        for (axis, values) in &self.axes {
            combinations = combinations
                .into_iter()
                .flat_map(|partial| {
                    values.iter().map(move |value| {
                        let mut combination = partial.clone();
                        combination.insert(axis.clone(), value.clone());
                        combination
                    })
                })
                .collect();
        }

        combinations.retain(|combination| !self.is_excluded(combination));
        combinations.extend(self.include.iter().cloned());
        combinations
    }

    fn is_excluded(&self, combination: &MatrixCombination) -> bool {
        self.exclude.iter().any(|rule| {
            rule.iter()
                .all(|(axis, value)| combination.get(axis) == Some(value))
        })
    }
}

/// Human-readable suffix for a combination: `stable` or `stable, linux`
pub fn describe_combination(combination: &MatrixCombination) -> String {
    combination
        .values()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
}
