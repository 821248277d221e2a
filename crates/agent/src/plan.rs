//! Execution plans for agents and pipes.

/// One entry of an execution plan: a unit run on its own, or a group run
/// concurrently and joined before the plan continues.
#[derive(Debug, Clone)]
pub enum PlanItem<T> {
    Sequential(T),
    Parallel(Vec<T>),
}

impl<T> PlanItem<T> {
    /// Units in this item, in declaration order.
    pub fn units(&self) -> &[T] {
        match self {
            PlanItem::Sequential(unit) => std::slice::from_ref(unit),
            PlanItem::Parallel(units) => units,
        }
    }
}
