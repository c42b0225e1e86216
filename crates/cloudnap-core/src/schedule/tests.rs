    use super::*;

    fn vm() -> ResourceRef {
        ResourceRef::new(ResourceKind::Vm, "fhm-1", "b1g-folder")
    }

    fn at(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn test_time_of_day_parse() {
        let t = at("09:30");
        assert_eq!((t.hour(), t.minute(), t.second()), (9, 30, 0));

        let t = at("23:59:59");
        assert_eq!((t.hour(), t.minute(), t.second()), (23, 59, 59));
        assert_eq!(t.to_string(), "23:59:59");
    }

    #[test]
    fn test_time_of_day_rejects_out_of_range() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("12:00:60".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn test_time_of_day_rejects_malformed() {
        for bad in ["", "9", "09:", "ab:cd", "09:00:00:00", "-1:00", "9.5:00"] {
            assert!(bad.parse::<TimeOfDay>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_resource_kind_labels() {
        assert_eq!(ResourceKind::Vm.as_str(), "vm");
        assert_eq!(ResourceKind::K8sCluster.to_string(), "k8s_cluster");
        assert_eq!("k8s_cluster".parse::<ResourceKind>().unwrap(), ResourceKind::K8sCluster);
        assert!("database".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_action_from_label() {
        assert_eq!(Action::from_label("start"), Some(Action::Start));
        assert_eq!(Action::from_label("stop"), Some(Action::Stop));
        assert_eq!(Action::from_label("restart"), None);
    }

    #[test]
    fn test_actions_iterates_enabled_only() {
        let spec = ScheduleSpec::new("office", vm()).with_stop(ActionTrigger::daily(at("19:00")));
        let actions: Vec<Action> = spec.actions().map(|(a, _)| a).collect();
        assert_eq!(actions, vec![Action::Stop]);
        assert_eq!(spec.job_name(Action::Stop), "office:stop");
    }

    #[test]
    fn test_validate_requires_an_action() {
        let spec = ScheduleSpec::new("empty", vm());
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_validate_requires_identifiers() {
        let spec = ScheduleSpec::new("", vm()).with_start(ActionTrigger::daily(at("09:00")));
        assert!(spec.validate().is_err());

        let spec = ScheduleSpec::new("no-id", ResourceRef::new(ResourceKind::Vm, "", "f"))
            .with_start(ActionTrigger::daily(at("09:00")));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_trigger() {
        let spec = ScheduleSpec::new("bad-cron", vm()).with_start(ActionTrigger::cron("not a cron"));
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("bad-cron"));

        let spec = ScheduleSpec::new("bad-day", vm())
            .with_stop(ActionTrigger::weekly(at("09:00"), 7));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_schedules_rejects_duplicates() {
        let a = ScheduleSpec::new("dup", vm()).with_start(ActionTrigger::daily(at("09:00")));
        let b = a.clone();
        match validate_schedules(&[a, b]) {
            Err(Error::DuplicateSchedule(name)) => assert_eq!(name, "dup"),
            other => panic!("Expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn test_reconcilable_excludes_interval_and_once() {
        let daily = ScheduleSpec::new("d", vm()).with_start(ActionTrigger::daily(at("09:00")));
        assert!(daily.is_reconcilable());

        let interval = ScheduleSpec::new("i", vm())
            .with_start(ActionTrigger::interval(Duration::from_secs(60)));
        assert!(!interval.is_reconcilable());

        let once = ScheduleSpec::new("o", vm())
            .with_stop(ActionTrigger::once(Utc::now()))
            .with_start(ActionTrigger::daily(at("09:00")));
        assert!(!once.is_reconcilable());
    }

    #[test]
    fn test_trigger_serde_shape() {
        let trigger = ActionTrigger::weekly(at("02:00"), 0);
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "weekly");
        assert_eq!(json["time"], "02:00:00");
        assert_eq!(json["weekday"], 0);
    }
