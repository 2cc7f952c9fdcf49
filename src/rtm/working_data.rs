//! Intermediate state recorded during a solve, for reuse by an external
//! adjoint or differentiation pass.

use super::adding::ColumnOperator;
use super::merge::MergedLayerProperty;
use super::two_stream::LayerOperator;

/// One step of the adding fold.
#[derive(Debug, Clone, PartialEq)]
pub struct AddingStep<T> {
    /// Index of the layer added in this step (0 is the top of the atmosphere).
    pub layer: usize,
    /// Local response of that layer.
    pub layer_operator: LayerOperator<T>,
    /// Response of the column from the top of that layer down to the surface.
    pub column: ColumnOperator<T>,
}

/// Everything recorded by one successful solve.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SolveRecord<T> {
    pub(crate) merged: Vec<MergedLayerProperty<T>>,
    pub(crate) surface: ColumnOperator<T>,
    pub(crate) steps: Vec<AddingStep<T>>,
}

/// Caller-owned sink for intermediate solver state.
///
/// Each successful solve appends its merged layer properties (in layer
/// order), its surface boundary operator, and one [`AddingStep`] per layer
/// (in fold order, from the surface upwards). A failed solve appends
/// nothing.
///
/// A `WorkingData` must not be shared between concurrent solves.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingData<T> {
    merged: Vec<MergedLayerProperty<T>>,
    surfaces: Vec<ColumnOperator<T>>,
    steps: Vec<AddingStep<T>>,
    num_layers: Vec<usize>,
}

impl<T> Default for WorkingData<T> {
    fn default() -> Self {
        Self {
            merged: Vec::new(),
            surfaces: Vec::new(),
            steps: Vec::new(),
            num_layers: Vec::new(),
        }
    }
}

impl<T> WorkingData<T> {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of solves recorded so far.
    pub fn solve_count(&self) -> usize {
        self.num_layers.len()
    }

    /// Merged layer properties of every recorded solve, concatenated.
    pub fn merged(&self) -> &[MergedLayerProperty<T>] {
        &self.merged
    }

    /// Surface boundary operator of every recorded solve.
    pub fn surfaces(&self) -> &[ColumnOperator<T>] {
        &self.surfaces
    }

    /// Adding steps of every recorded solve, concatenated.
    pub fn steps(&self) -> &[AddingStep<T>] {
        &self.steps
    }

    /// Merged properties and adding steps of solve `solve`, or `None` if
    /// fewer solves have been recorded.
    pub fn solve(&self, solve: usize) -> Option<(&[MergedLayerProperty<T>], &[AddingStep<T>])> {
        let num_layers = *self.num_layers.get(solve)?;
        let start: usize = self.num_layers[..solve].iter().sum();
        let range = start..start + num_layers;
        Some((&self.merged[range.clone()], &self.steps[range]))
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.merged.clear();
        self.surfaces.clear();
        self.steps.clear();
        self.num_layers.clear();
    }

    pub(crate) fn commit(&mut self, record: SolveRecord<T>) {
        debug_assert_eq!(record.merged.len(), record.steps.len());
        self.num_layers.push(record.merged.len());
        self.merged.extend(record.merged);
        self.surfaces.push(record.surface);
        self.steps.extend(record.steps);
    }
}
