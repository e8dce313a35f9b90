//! # Parameter Shape Inventory
//!
//! Collects the named shapes of the learnable tensors of a module tree so that
//! two instances (a freshly built network and one with loaded weights) can be
//! compared parameter by parameter.

use burn::{
    nn::{conv::Conv2d, BatchNorm},
    prelude::*,
};

/// A parameter whose shape differs between two inventories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    /// Dotted module path of the parameter.
    pub name: String,
    /// Shape in the reference inventory.
    pub expected: Vec<usize>,
    /// Shape in the compared inventory, `None` if the parameter is absent.
    pub actual: Option<Vec<usize>>,
}

/// Ordered list of `(path, shape)` pairs.
#[derive(Debug, Clone, Default)]
pub struct ShapeInventory {
    scope: Vec<String>,
    entries: Vec<(String, Vec<usize>)>,
}

impl ShapeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with `name` pushed onto the current path.
    pub fn scoped<F: FnOnce(&mut Self)>(&mut self, name: &str, f: F) {
        self.scope.push(name.to_string());
        f(self);
        self.scope.pop();
    }

    /// Records a single named shape under the current path.
    pub fn push(&mut self, name: &str, shape: &[usize]) {
        let path = self
            .scope
            .iter()
            .map(String::as_str)
            .chain(core::iter::once(name))
            .collect::<Vec<_>>()
            .join(".");
        self.entries.push((path, shape.to_vec()));
    }

    pub fn conv2d<B: Backend>(&mut self, name: &str, conv: &Conv2d<B>) {
        self.scoped(name, |inv| {
            inv.push("weight", &conv.weight.val().dims());
            if let Some(bias) = &conv.bias {
                inv.push("bias", &bias.val().dims());
            }
        });
    }

    pub fn batch_norm<B: Backend>(&mut self, name: &str, bn: &BatchNorm<B, 2>) {
        self.scoped(name, |inv| {
            inv.push("gamma", &bn.gamma.val().dims());
            inv.push("beta", &bn.beta.val().dims());
            inv.push("running_mean", &bn.running_mean.value().dims());
            inv.push("running_var", &bn.running_var.value().dims());
        });
    }

    pub fn entries(&self) -> &[(String, Vec<usize>)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of scalar values over all recorded tensors.
    pub fn num_elements(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, shape)| shape.iter().product::<usize>())
            .sum()
    }

    /// Returns the first parameter of `self` whose shape differs in `other`.
    pub fn first_mismatch(&self, other: &Self) -> Option<ShapeMismatch> {
        self.entries.iter().find_map(|(name, expected)| {
            let actual = other
                .entries
                .iter()
                .find(|(other_name, _)| other_name == name)
                .map(|(_, shape)| shape.clone());
            match actual {
                Some(ref shape) if shape == expected => None,
                actual => Some(ShapeMismatch {
                    name: name.clone(),
                    expected: expected.clone(),
                    actual,
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        nn::{conv::Conv2dConfig, BatchNormConfig},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn records_scoped_paths() {
        let device = Default::default();
        let conv = Conv2dConfig::new([4, 8], [3, 3])
            .with_bias(false)
            .init::<TestBackend>(&device);
        let bn = BatchNormConfig::new(8).init::<TestBackend, 2>(&device);

        let mut inventory = ShapeInventory::new();
        inventory.scoped("stem", |inv| {
            inv.conv2d("conv", &conv);
            inv.batch_norm("bn", &bn);
        });

        assert_eq!(inventory.len(), 5);
        assert_eq!(
            inventory.entries()[0],
            ("stem.conv.weight".to_string(), vec![8, 4, 3, 3])
        );
        assert_eq!(inventory.entries()[4].0, "stem.bn.running_var");
        assert_eq!(inventory.num_elements(), 8 * 4 * 9 + 4 * 8);
    }

    #[test]
    fn reports_first_differing_shape() {
        let device = Default::default();
        let narrow = Conv2dConfig::new([4, 8], [1, 1]).init::<TestBackend>(&device);
        let wide = Conv2dConfig::new([4, 16], [1, 1]).init::<TestBackend>(&device);

        let mut expected = ShapeInventory::new();
        expected.conv2d("proj", &narrow);
        let mut actual = ShapeInventory::new();
        actual.conv2d("proj", &wide);

        assert_eq!(expected.first_mismatch(&expected.clone()), None);
        assert_eq!(
            expected.first_mismatch(&actual),
            Some(ShapeMismatch {
                name: "proj.weight".to_string(),
                expected: vec![8, 4, 1, 1],
                actual: Some(vec![16, 4, 1, 1]),
            })
        );
    }

    #[test]
    fn missing_parameter_is_a_mismatch() {
        let mut expected = ShapeInventory::new();
        expected.push("head.weight", &[1, 2]);

        let mismatch = expected.first_mismatch(&ShapeInventory::new()).unwrap();
        assert_eq!(mismatch.actual, None);
    }
}
