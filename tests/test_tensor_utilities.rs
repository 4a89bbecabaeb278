// Tests for the tensor utilities: norm derivatives against finite
// differences, the QR solve, submatrix extraction and shape guards.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2};
use rust_quasi_newton::utils::{tensor, Device, SimpleRng};

fn random_vector(n: usize, seed: u64) -> Array1<f64> {
    let mut rng = SimpleRng::new(seed);
    Array1::from_shape_fn(n, |_| rng.gen_range(-2.0, 2.0))
}

mod tensor_utilities_tests {
    use super::*;

    // ========================================================================
    // Norms
    // ========================================================================

    #[test]
    fn test_l2_gradient_and_hessian_match_finite_differences() {
        let device = Device::sequential();
        let v = random_vector(4, 5);
        let h = 1e-6;

        let gradient = tensor::l2_norm_gradient(&device, &v.view());
        let hessian = tensor::l2_norm_hessian(&device, &v.view());

        for i in 0..4 {
            let mut plus = v.clone();
            plus[i] += h;
            let mut minus = v.clone();
            minus[i] -= h;

            let numerical = (tensor::l2_norm(&device, &plus.view())
                - tensor::l2_norm(&device, &minus.view()))
                / (2.0 * h);
            assert_abs_diff_eq!(gradient[i], numerical, epsilon = 1e-6);

            let gradient_plus = tensor::l2_norm_gradient(&device, &plus.view());
            let gradient_minus = tensor::l2_norm_gradient(&device, &minus.view());
            for j in 0..4 {
                let numerical = (gradient_plus[j] - gradient_minus[j]) / (2.0 * h);
                assert_abs_diff_eq!(hessian[[j, i]], numerical, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_zero_vector_norms_are_finite() {
        let device = Device::sequential();
        let zero = Array1::<f64>::zeros(3);
        assert_eq!(tensor::l2_norm(&device, &zero.view()), 0.0);
        assert_eq!(tensor::l2_norm_gradient(&device, &zero.view()), Array1::<f64>::zeros(3));
        assert_eq!(tensor::l2_norm_hessian(&device, &zero.view()), Array2::<f64>::zeros((3, 3)));
        assert_eq!(tensor::l1_norm_gradient(&zero.view()), Array1::<f64>::zeros(3));

        let empty = Array1::<f64>::zeros(0);
        assert_eq!(tensor::l1_norm(&device, &empty.view()), 0.0);
        assert_eq!(tensor::l2_norm_gradient(&device, &empty.view()).len(), 0);
    }

    #[test]
    fn test_l1_hessian_is_zero() {
        let v = array![1.5, -0.25, f64::MIN_POSITIVE / 2.0, 0.0];
        let hessian = tensor::l1_norm_hessian(&v.view());
        assert_eq!(hessian.dim(), (4, 4));
        assert!(hessian.iter().all(|&value| value == 0.0));

        // entries under the zero threshold
        let tiny = array![f64::MIN_POSITIVE / 4.0, -f64::MIN_POSITIVE / 4.0];
        assert_eq!(tensor::l1_norm_hessian(&tiny.view()), Array2::<f64>::zeros((2, 2)));
        assert!(tensor::is_zero(&tiny.view()));

        assert_eq!(tensor::l1_norm_hessian(&Array1::<f64>::zeros(0).view()).dim(), (0, 0));
    }

    #[test]
    fn test_norms_agree_across_devices() {
        let sequential = Device::sequential();
        let parallel = Device::with_threads(3).unwrap();
        let v = random_vector(1000, 9);
        assert_abs_diff_eq!(
            tensor::l1_norm(&sequential, &v.view()),
            tensor::l1_norm(&parallel, &v.view()),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            tensor::l2_norm(&sequential, &v.view()),
            tensor::l2_norm(&parallel, &v.view()),
            epsilon = 1e-9
        );
    }

    // ========================================================================
    // Linear algebra
    // ========================================================================

    #[test]
    fn test_householder_solve() {
        let a = array![[4.0, 1.0, 2.0], [1.0, 5.0, -1.0], [2.0, -1.0, 6.0]];
        let x = array![1.0, -2.0, 0.5];
        let b = a.dot(&x);
        let solution = tensor::perform_householder_qr_decomposition(&a.view(), &b.view()).unwrap();
        for (s, e) in solution.iter().zip(x.iter()) {
            assert_abs_diff_eq!(s, e, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_householder_rejects_rectangular() {
        let a = Array2::<f64>::zeros((3, 2));
        let b = Array1::<f64>::zeros(3);
        let err = tensor::perform_householder_qr_decomposition(&a.view(), &b.view()).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    #[test]
    fn test_kronecker_product_and_diagonal() {
        let mut product = tensor::kronecker_product(&array![1.0, 2.0].view(), &array![3.0, 4.0, 5.0].view());
        assert_eq!(product, array![[3.0, 4.0, 5.0], [6.0, 8.0, 10.0]]);
        tensor::sum_diagonal(&mut product, 1.0);
        assert_eq!(product, array![[4.0, 4.0, 5.0], [6.0, 9.0, 10.0]]);
    }

    #[test]
    fn test_fill_submatrix() {
        let matrix = Array2::from_shape_fn((4, 4), |(i, j)| (10 * i + j) as f64);
        let sub = tensor::fill_submatrix(&matrix.view(), &[3, 0], &[1, 2]).unwrap();
        assert_eq!(sub, array![[31.0, 32.0], [1.0, 2.0]]);
        assert!(tensor::fill_submatrix(&matrix.view(), &[4], &[0]).is_err());
    }

    // ========================================================================
    // Predicates and guards
    // ========================================================================

    #[test]
    fn test_predicates() {
        assert!(tensor::is_constant(&array![2.0, 2.0, 2.0].view()));
        assert!(!tensor::is_constant(&array![2.0, 2.0, 2.5].view()));
        assert!(tensor::is_binary(&array![[0.0, 1.0], [1.0, 1.0]].view()));
        assert!(!tensor::is_binary(&array![[0.0, 0.5]].view()));
        assert!(tensor::is_false(&[false, false]));
        assert!(!tensor::is_false(&[false, true]));
        assert!(tensor::is_zero_with_limit(&array![1e-9, -1e-9].view(), 1e-8));
        assert!(!tensor::is_zero(&array![1e-9].view()));
        assert_eq!(tensor::count_nan(&array![f64::NAN, 1.0, f64::NAN].view()), 2);
        assert!(tensor::is_equal(&array![[1.0, 1.05]].view(), 1.0, 0.1));
    }

    #[test]
    fn test_are_equal_checks_shapes() {
        let a = array![[1.0, 2.0]];
        let b = array![[1.0, 2.0 + 1e-12]];
        assert!(tensor::are_equal(&a.view(), &b.view(), 1e-9).unwrap());
        let c = array![[1.0], [2.0]];
        assert!(tensor::are_equal(&a.view(), &c.view(), 1e-9).is_err());
    }

    #[test]
    fn test_row_and_column_scaling() {
        let mut matrix = array![[1.0, 2.0], [3.0, 4.0]];
        tensor::multiply_rows(&mut matrix, &array![2.0, 10.0].view()).unwrap();
        assert_eq!(matrix, array![[2.0, 20.0], [6.0, 40.0]]);
        tensor::divide_columns(&mut matrix, &array![2.0, 0.0].view()).unwrap();
        assert_eq!(matrix, array![[1.0, 10.0], [6.0, 40.0]]);
        assert!(tensor::divide_columns(&mut matrix, &array![1.0].view()).is_err());
    }

    #[test]
    fn test_shape_guards() {
        let matrix = Array2::<f64>::zeros((2, 3));
        assert!(tensor::check_dimensions(&matrix.view(), 2, 3, "guard").is_ok());
        assert!(tensor::check_dimensions(&matrix.view(), 3, 2, "guard").is_err());
        assert!(tensor::check_columns_number(&matrix.view(), 3, "guard").is_ok());
        assert!(tensor::check_size(&Array1::zeros(2).view(), 3, "guard").is_err());
    }
}
