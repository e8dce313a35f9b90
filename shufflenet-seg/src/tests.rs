#[cfg(test)]
mod tests {
    use crate::config::{ArchPreset, DynamicAxis, ExportConfig, OutputMode, RecordFormat, ShuffleSegConfig};
    use crate::error::ShuffleSegError;
    use shufflenet_v2::ShuffleNetError;

    #[test]
    fn test_default_configuration() {
        let config = ShuffleSegConfig::new();

        assert_eq!(config.backbone.stages_repeats, vec![4, 8, 4]);
        assert_eq!(config.backbone.stages_out_channels, vec![24, 116, 232, 464, 1024]);
        assert_eq!(config.mask_classes, 1);
        assert_eq!(config.concat_ch, 12);
        assert_eq!(config.output_mode, OutputMode::DualOutput);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mask_classes_kept_separate_from_num_classes() {
        let config = ShuffleSegConfig::new().with_mask_classes(4).with_num_classes(2);
        assert_eq!(config.effective_mask_classes(), 4);

        let shadowed = config.with_mask_classes_from_num_classes(true);
        assert_eq!(shadowed.effective_mask_classes(), 2);
    }

    #[test]
    fn test_two_stage_repeats_error() {
        let config = ShuffleSegConfig::new().with_backbone(
            shufflenet_v2::ShuffleNetV2Config::new(vec![4, 8], vec![24, 116, 232, 464, 1024]),
        );

        match config.validate() {
            Err(ShuffleSegError::Backbone(ShuffleNetError::InvalidConfiguration { reason })) => {
                assert!(reason.contains("expected stages_repeats as list of 3 positive ints"));
            }
            _ => panic!("Expected a backbone InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_four_stage_widths_error() {
        let config = ShuffleSegConfig::new().with_backbone(
            shufflenet_v2::ShuffleNetV2Config::new(vec![4, 8, 4], vec![24, 116, 232, 464]),
        );

        let err = config.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("expected stages_out_channels as list of 5 positive ints"));
    }

    #[test]
    fn test_odd_concat_channels_error() {
        let config = ShuffleSegConfig::new().with_concat_ch(7);

        match config.validate() {
            Err(ShuffleSegError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("concat_ch must be an even number"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_zero_mask_classes_error() {
        let config = ShuffleSegConfig::new().with_mask_classes(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("x0.5".parse::<ArchPreset>().unwrap(), ArchPreset::X0_5);
        assert_eq!("x1_0".parse::<ArchPreset>().unwrap(), ArchPreset::X1_0);
        assert_eq!("1.5".parse::<ArchPreset>().unwrap(), ArchPreset::X1_5);
        assert_eq!(
            "shufflenetv2_x2.0".parse::<ArchPreset>().unwrap(),
            ArchPreset::X2_0
        );
        assert!("x3.0".parse::<ArchPreset>().is_err());
    }

    #[test]
    fn test_preset_widths() {
        let config = ShuffleSegConfig::from_preset(ArchPreset::X2_0);
        assert_eq!(
            config.backbone.stages_out_channels,
            vec![24, 244, 488, 976, 2048]
        );
    }

    #[test]
    fn test_preset_matching_backbone() {
        for preset in ArchPreset::ALL {
            assert_eq!(ArchPreset::matching(&preset.backbone_config()), Some(preset));
        }

        let custom = shufflenet_v2::ShuffleNetV2Config::new(vec![4, 4, 4], vec![24, 116, 232, 464, 1024]);
        assert_eq!(ArchPreset::matching(&custom), None);
    }

    #[test]
    fn test_record_format_parsing() {
        assert_eq!("mpk".parse::<RecordFormat>().unwrap(), RecordFormat::NamedMpk);
        assert_eq!("mpk.gz".parse::<RecordFormat>().unwrap(), RecordFormat::NamedMpkGz);
        assert_eq!("JSON".parse::<RecordFormat>().unwrap(), RecordFormat::PrettyJson);
        assert!("onnx".parse::<RecordFormat>().is_err());
    }

    #[test]
    fn test_dynamic_axis_parsing() {
        let axis = "images:0:batch".parse::<DynamicAxis>().unwrap();
        assert_eq!(axis, DynamicAxis::new("images".into(), 0, "batch".into()));

        assert!("images:batch".parse::<DynamicAxis>().is_err());
        assert!("images:x:batch".parse::<DynamicAxis>().is_err());
        assert!(":0:batch".parse::<DynamicAxis>().is_err());
    }

    #[test]
    fn test_default_export_configuration() {
        let config = ExportConfig::new();

        assert_eq!(config.input_shape, [1, 3, 256, 320]);
        assert_eq!(config.format_version, 12);
        assert_eq!(config.input_names, vec!["images".to_string()]);
        assert_eq!(config.output_names, vec!["output0".to_string()]);
        assert!(config.validate(1).is_ok());
    }

    #[test]
    fn test_export_shape_must_be_divisible_by_32() {
        let config = ExportConfig::new().with_input_shape([1, 3, 250, 320]);

        match config.validate(1) {
            Err(ShuffleSegError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("multiples of 32"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_export_rejects_empty_batch_and_wrong_channels() {
        assert!(ExportConfig::new()
            .with_input_shape([0, 3, 256, 320])
            .validate(1)
            .is_err());
        assert!(ExportConfig::new()
            .with_input_shape([1, 4, 256, 320])
            .validate(1)
            .is_err());
    }

    #[test]
    fn test_dynamic_axis_must_name_a_tensor() {
        let config = ExportConfig::new()
            .with_dynamic_axes(vec![DynamicAxis::new("input".into(), 0, "batch".into())]);

        match config.validate(1) {
            Err(ShuffleSegError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("unknown tensor 'input'"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_channel_axis_cannot_be_dynamic() {
        let config = ExportConfig::new()
            .with_dynamic_axes(vec![DynamicAxis::new("output0".into(), 1, "classes".into())]);

        assert!(config.validate(1).is_err());
    }

    #[test]
    fn test_file_stem_without_extension() {
        let config = ExportConfig::new().with_file_stem("model.v1".into());
        assert!(config.validate(1).is_err());

        let config = ExportConfig::new().with_file_stem("model_v1".into());
        assert_eq!(config.record_path().file_name().unwrap(), "model_v1.mpk");
        assert_eq!(config.manifest_path().file_name().unwrap(), "model_v1.graph.json");
    }
}
