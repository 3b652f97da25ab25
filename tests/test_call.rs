//! Dispatcher integration: the call surface end to end.

use opix::{call, call_full, CallReturn, ErrorKind, Image, Value};

fn single_image(ret: CallReturn) -> Image {
    ret.into_image().expect("expected one image")
}

#[test]
fn test_black_returns_one_zero_image() {
    let image = single_image(call("black", &[10.into(), 10.into()]).unwrap());
    assert_eq!((image.width(), image.height(), image.bands()), (10, 10, 1));
    assert_eq!(image.getpoint(0, 0).unwrap(), vec![0.0]);
}

#[test]
fn test_add_is_elementwise() {
    let a = Image::new_from_array(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    let b = Image::new_from_array(&[vec![10.0, 20.0], vec![30.0, 40.0]]).unwrap();
    let sum = single_image(call("add", &[a.into(), b.into()]).unwrap());
    assert_eq!(sum.getpoint(0, 0).unwrap(), vec![11.0]);
    assert_eq!(sum.getpoint(1, 1).unwrap(), vec![44.0]);
}

#[test]
fn test_linear_scales_and_shifts_per_band() {
    let a = Image::black_bands(4, 4, 3).unwrap();
    let out = single_image(
        call_full(
            "linear",
            &[a.into()],
            &[
                ("a", vec![1.0f64, 1.0, 1.0].into()),
                ("b", vec![2.0f64, 2.0, 2.0].into()),
            ],
            "",
        )
        .unwrap(),
    );
    assert_eq!(out.bands(), 3);
    assert_eq!(out.getpoint(2, 2).unwrap(), vec![2.0, 2.0, 2.0]);
}

#[test]
fn test_arity_mismatch_too_few() {
    let err = call("black", &[10.into()]).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::ArityMismatch { expected: 2, found: 1, .. }
    ));
}

#[test]
fn test_arity_mismatch_extras_are_not_dropped() {
    let err = call("black", &[10.into(), 10.into(), 3.into()]).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::ArityMismatch { expected: 2, found: 3, .. }
    ));
}

#[test]
fn test_unknown_keyword_rejected() {
    let err = call_full("black", &[8.into(), 8.into()], &[("volume", 11.into())], "")
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownArgument { .. }));
}

#[test]
fn test_required_argument_as_keyword_rejected() {
    // width is required-input, not optional: keywords may only name
    // optional arguments
    let err = call_full("black", &[8.into(), 8.into()], &[("width", 4.into())], "")
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownArgument { .. }));
}

#[test]
fn test_unknown_operation() {
    let err = call("frobnicate", &[]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NoSuchOperation { .. }));
}

#[test]
fn test_mismatched_shapes_fail() {
    let a = Image::black(3, 3).unwrap();
    let b = Image::black(5, 5).unwrap();
    let err = call("add", &[a.into(), b.into()]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::OperationFailed { .. }));
}

#[test]
fn test_modify_leaves_caller_value_unchanged() {
    let original = Image::black(8, 8).unwrap();
    let before = original.write_to_buffer().unwrap();

    let painted = original.draw_rect(&[255.0], 2, 2, 4, 4, true).unwrap();

    // snapshot comparison: the input is provably untouched
    assert_eq!(original.write_to_buffer().unwrap(), before);
    assert_ne!(painted, original);
    assert_eq!(original.getpoint(3, 3).unwrap(), vec![0.0]);
    assert_eq!(painted.getpoint(3, 3).unwrap(), vec![255.0]);
    assert_eq!(painted.getpoint(0, 0).unwrap(), vec![0.0]);
}

#[test]
fn test_scalar_auto_promotion_matches_explicit() {
    let a = Image::black(6, 5).unwrap();

    let promoted = single_image(call("add", &[(&a).into(), 2.into()]).unwrap());
    let explicit = single_image(
        call("add", &[(&a).into(), a.new_from_image(&[2.0]).unwrap().into()]).unwrap(),
    );

    assert_eq!(promoted.width(), explicit.width());
    assert_eq!(promoted.getpoint(5, 4).unwrap(), explicit.getpoint(5, 4).unwrap());
    assert_eq!(promoted.getpoint(0, 0).unwrap(), vec![2.0]);
}

#[test]
fn test_promotion_without_object_fails() {
    // both arguments bare scalars: nothing to take a shape from
    let err = call("add", &[1.into(), 2.into()]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::NoMatchTarget { .. }));
}

#[test]
fn test_promotion_finds_object_inside_arrays() {
    let a = Image::black(4, 4).unwrap();
    // the image hides inside the array argument; constants in the same
    // array are promoted against it
    let joined = single_image(
        call(
            "bandjoin",
            &[Value::Array(vec![(&a).into(), 7.into()])],
        )
        .unwrap(),
    );
    assert_eq!(joined.bands(), 2);
    assert_eq!(joined.getpoint(1, 1).unwrap(), vec![0.0, 7.0]);
}

#[test]
fn test_2d_array_promotes_without_match_target() {
    let a = Image::black(2, 2).unwrap();
    let matrix = Value::Array(vec![
        Value::Array(vec![1.into(), 2.into()]),
        Value::Array(vec![3.into(), 4.into()]),
    ]);
    let sum = single_image(call("add", &[a.into(), matrix]).unwrap());
    assert_eq!(sum.getpoint(1, 1).unwrap(), vec![4.0]);
}

#[test]
fn test_optional_outputs_shape() {
    let image = Image::new_from_array(&[vec![5.0, 1.0], vec![3.0, 9.0]]).unwrap();

    // no optionals requested: single unwrapped value
    let min = call("min", &[(&image).into()]).unwrap().into_double().unwrap();
    assert_eq!(min, 1.0);

    // optionals requested: aggregate with required first, then the map
    let aggregate = call_full(
        "min",
        &[(&image).into()],
        &[("x", true.into()), ("y", true.into())],
        "",
    )
    .unwrap()
    .into_aggregate()
    .unwrap();
    assert_eq!(aggregate.required.len(), 1);
    assert_eq!(aggregate.required[0], Value::Double(1.0));
    assert_eq!(aggregate.optional("x"), Some(&Value::Int(1)));
    assert_eq!(aggregate.optional("y"), Some(&Value::Int(0)));
}

#[test]
fn test_min_max_position_sugar() {
    let image = Image::new_from_array(&[vec![5.0, 1.0], vec![3.0, 9.0]]).unwrap();
    assert_eq!(image.min_position().unwrap(), (1.0, 1, 0));
    assert_eq!(image.max_position().unwrap(), (9.0, 1, 1));
}

#[test]
fn test_string_options_apply() {
    let image = single_image(
        call_full("black", &[5.into(), 4.into()], &[], "bands=3").unwrap(),
    );
    assert_eq!(image.bands(), 3);
}

#[test]
fn test_explicit_arguments_beat_string_options() {
    let image = single_image(
        call_full("black", &[5.into(), 4.into()], &[("bands", 2.into())], "bands=3").unwrap(),
    );
    assert_eq!(image.bands(), 2);
}

#[test]
fn test_string_options_unknown_key() {
    let err = call_full("black", &[5.into(), 4.into()], &[], "volume=11").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownArgument { .. }));
}

#[test]
fn test_enum_by_nick_through_call() {
    let image = Image::new_from_array(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    let rotated = image.rot("d90").unwrap();
    assert_eq!(rotated.getpoint(1, 0).unwrap(), vec![1.0]);

    let err = image.rot("d45").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidEnumValue { .. }));
}

#[test]
fn test_deprecated_required_arguments_are_skipped() {
    let a = Image::black(3, 3).unwrap();
    let b = Image::black(3, 3).unwrap();
    // im_add declares a deprecated required input; arity counts two
    let sum = single_image(call("im_add", &[a.into(), b.into()]).unwrap());
    assert_eq!(sum.getpoint(0, 0).unwrap(), vec![0.0]);
}

#[test]
fn test_blob_through_operations() {
    let bytes: Vec<u8> = (0..12).collect();
    let image = single_image(
        call_full(
            "bufload",
            &[Value::Blob(bytes.clone()), 4.into(), 3.into()],
            &[],
            "",
        )
        .unwrap(),
    );
    assert_eq!((image.width(), image.height()), (4, 3));
    assert_eq!(image.getpoint(1, 1).unwrap(), vec![5.0]);

    let saved = image.write_to_buffer().unwrap();
    assert_eq!(saved, bytes);
}

#[test]
fn test_subtract_multiply_divide() {
    let a = Image::black(2, 2).unwrap().linear(&[1.0], &[8.0]).unwrap();
    let b = Image::black(2, 2).unwrap().linear(&[1.0], &[2.0]).unwrap();
    assert_eq!(a.subtract(&b).unwrap().getpoint(0, 0).unwrap(), vec![6.0]);
    assert_eq!(a.multiply(&b).unwrap().getpoint(0, 0).unwrap(), vec![16.0]);
    assert_eq!(a.divide(&b).unwrap().getpoint(0, 0).unwrap(), vec![4.0]);
}

#[test]
fn test_method_call_by_name() {
    let a = Image::black(4, 4).unwrap();
    // the escape hatch: operations unknown at wrapper-writing time stay
    // callable by name
    let inverted = a.method("invert", &[]).unwrap().into_image().unwrap();
    assert_eq!(inverted.getpoint(0, 0).unwrap(), vec![255.0]);
}

#[test]
fn test_copy_carries_page_height_metadata() {
    let a = Image::black(4, 8).unwrap();
    let copied = call_full("copy", &[a.into()], &[("page-height", 4.into())], "")
        .unwrap()
        .into_image()
        .unwrap();
    assert_eq!(copied.get("page-height").unwrap(), Value::Int(4));
}

#[test]
fn test_avg() {
    let image = Image::new_from_array(&[vec![0.0, 10.0], vec![20.0, 30.0]]).unwrap();
    assert_eq!(image.avg().unwrap(), 15.0);
}
