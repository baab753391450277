use bns_solver::{
    BlockBuilderAndSolver, BuilderAndSolver, DenseLuSolver, DofKey, DofSet,
    IncrementalUpdateStaticScheme, LinearBar, ModelPart, SystemMatrix, VariableKey,
    VariableRegistry,
};
use nalgebra::DMatrix;
use proptest::prelude::*;
use std::sync::Arc;

/// Bars between arbitrary node pairs, with integer stiffness so that sums are
/// exact in floating point whatever the summation order.
fn bars(num_nodes: usize) -> impl Strategy<Value = Vec<(usize, usize, u8)>> {
    prop::collection::vec((1..=num_nodes, 1..=num_nodes, 1u8..20), 1..25)
        .prop_map(|bars| bars.into_iter().filter(|(a, b, _)| a != b).collect())
}

fn assembled_matrix(num_nodes: usize, bars: &[(usize, usize, u8)]) -> DMatrix<f64> {
    let registry = Arc::new(VariableRegistry::structural());
    let ux = registry.key("DISPLACEMENT_X").unwrap();
    let mut model = ModelPart::new(registry);
    for id in 1..=num_nodes {
        model.add_node(id, [id as f64, 0.0, 0.0]).unwrap();
        model.add_dof(id, ux).unwrap();
    }
    for (id, &(a, b, k)) in bars.iter().enumerate() {
        model.add_element(Box::new(LinearBar::new(id + 1, [a, b], ux, f64::from(k))));
    }

    let scheme = IncrementalUpdateStaticScheme;
    let mut builder = BlockBuilderAndSolver::new(Box::new(DenseLuSolver));
    builder.set_up_dof_set(&scheme, &model).unwrap();
    builder.set_up_system(&model).unwrap();
    builder.build(&scheme, &model).unwrap();
    SystemMatrix::Sparse(builder.system_matrix().unwrap()).to_dense()
}

fn keys(nodes: &[usize], variables: &[u32]) -> Vec<DofKey> {
    nodes
        .iter()
        .flat_map(|&n| variables.iter().map(move |&v| DofKey::new(n, VariableKey(v))))
        .collect()
}

proptest! {
    #[test]
    fn assembly_does_not_depend_on_element_order(
        (bars, shuffled) in bars(6).prop_flat_map(|bars| {
            let shuffled = Just(bars.clone()).prop_shuffle();
            (Just(bars), shuffled)
        })
    ) {
        prop_assume!(!bars.is_empty());
        let a = assembled_matrix(6, &bars);
        let b = assembled_matrix(6, &shuffled);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn assembled_rows_sum_to_zero(bars in bars(5)) {
        prop_assume!(!bars.is_empty());
        let a = assembled_matrix(5, &bars);
        for row in a.row_iter() {
            prop_assert_eq!(row.sum(), 0.0);
        }
        prop_assert_eq!(a.transpose(), a);
    }

    #[test]
    fn numbering_is_a_bijection(
        nodes in prop::collection::vec(1usize..50, 1..30),
        variables in prop::collection::vec(0u32..3, 1..4),
    ) {
        let mut dof_set = DofSet::from_keys(keys(&nodes, &variables)).unwrap();
        dof_set.number_block();

        let mut ids: Vec<usize> = dof_set.iter().map(|(_, eq)| eq).collect();
        ids.sort_unstable();
        prop_assert_eq!(ids, (0..dof_set.len()).collect::<Vec<_>>());
        prop_assert_eq!(dof_set.equation_system_size(), dof_set.len());
    }

    #[test]
    fn numbering_ignores_input_order(
        (input, shuffled) in prop::collection::vec((1usize..20, 0u32..3), 1..40)
            .prop_flat_map(|input| (Just(input.clone()), Just(input).prop_shuffle()))
    ) {
        let to_keys = |pairs: &[(usize, u32)]| {
            pairs.iter().map(|&(n, v)| DofKey::new(n, VariableKey(v))).collect::<Vec<_>>()
        };
        let a = DofSet::from_keys(to_keys(&input)).unwrap();
        let b = DofSet::from_keys(to_keys(&shuffled)).unwrap();

        prop_assert_eq!(a.keys(), b.keys());
        for key in a.keys() {
            prop_assert_eq!(a.equation_id(*key).unwrap(), b.equation_id(*key).unwrap());
        }
    }
}
