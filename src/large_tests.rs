#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    use crate::{
        ast::NodeKind,
        emit::{referenced_labels, Target},
        format::ReportFormat,
        parser,
        pipeline::{Decompiled, Options, Pipeline},
        symbols::{SymbolPaths, SymbolSources},
    };

    const COUNTED_LOOP: &str = "\
        $C000: LDX #$00\n\
        $C002: INX\n\
        $C003: CPX #$0A\n\
        $C005: BNE $C002\n\
        $C007: RTS\n";

    fn manifest_path(relative: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
    }

    // Pipeline over the symbol tables shipped with the crate
    fn shipped_pipeline(target: Target) -> Pipeline {
        let sources = SymbolSources::load(&SymbolPaths::from_dir(manifest_path("symbols")));
        assert!(!sources.routines.is_empty(), "KERNAL table did not load");
        assert!(!sources.hardware.is_empty(), "hardware table did not load");
        Pipeline::new(sources, Options { target, ..Options::default() })
    }

    fn load_demo() -> String {
        let path = manifest_path("demos/border_flash.asm");
        println!("Loading demo listing: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => panic!("Failed to load demo listing: {}", e),
        }
    }

    fn decompile(target: Target, listing: &str) -> Decompiled {
        match shipped_pipeline(target).decompile(listing) {
            Ok(decompiled) => decompiled,
            Err(e) => panic!("Decompilation failed: {}", e),
        }
    }

    #[test]
    fn test_counted_loop_becomes_one_for_node() {
        let decompiled = decompile(Target::ModernBasic, COUNTED_LOOP);
        let program = &decompiled.unit.program;

        assert_eq!(program.count(NodeKind::For), 1);
        assert_eq!(program.count(NodeKind::Raw), 0);

        let mut for_params = Vec::new();
        program.walk(&mut |node| {
            if node.kind == NodeKind::For {
                for_params = node.params.clone();
            }
        });
        assert_eq!(for_params, vec!["0", "10", "1"]);
    }

    #[test]
    fn test_hardware_store_is_named() {
        let decompiled = decompile(Target::ModernBasic, "$D000: LDA #$05\n$D002: STA $D020\n$D005: RTS\n");

        let mut store = None;
        decompiled.unit.program.walk(&mut |node| {
            if node.kind == NodeKind::Assign && node.address == Some(0xD002) {
                store = Some(node.params.clone());
            }
        });
        assert_eq!(store, Some(vec!["BORDER_COLOR".to_string(), "A".to_string()]));
        assert_eq!(decompiled.unit.program.count(NodeKind::GlobalVar), 0);

        println!("{}", decompiled.text);
        assert!(decompiled.text.contains("BORDER_COLOR = A"));
        assert!(!decompiled.text.contains("53280"));
        assert!(!decompiled.text.contains("D020"));
    }

    #[test]
    fn test_unknown_mnemonic_gives_one_raw_node() {
        let decompiled = decompile(Target::Curly, "$C000: LDA #$01\n$C002: LAX $10\n$C004: RTS\n");
        assert_eq!(decompiled.unit.program.count(NodeKind::Raw), 1);
        assert!(decompiled.text.contains("/* LAX $10 */"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let listing = load_demo();
        for target in Target::available_targets() {
            let first = decompile(*target, &listing).text;
            let second = decompile(*target, &listing).text;
            assert_eq!(first, second, "{} output differs between runs", target);
        }
    }

    #[test]
    fn test_every_control_target_is_named() {
        let listing = load_demo();
        let decompiled = decompile(Target::ModernBasic, &listing);
        let parsed = parser::parse(&listing);

        for insn in &parsed.instructions {
            if let Some(target) = insn.target() {
                let name = decompiled.symbols.name(target);
                assert!(name.is_some_and(|name| !name.is_empty()), "{} has no target name", insn);
            }
        }
        assert_eq!(decompiled.symbols.name(0xC019), Some("WAIT_KEY"));
        assert_eq!(decompiled.symbols.name(0xFFE4), Some("GETIN"));
    }

    #[test]
    fn test_partition_is_exhaustive_and_disjoint() {
        let listing = load_demo();
        let decompiled = decompile(Target::ModernBasic, &listing);
        let parsed = parser::parse(&listing);

        let covered: usize = decompiled.blocks.iter().map(|block| block.instructions.len()).sum();
        assert_eq!(covered, parsed.instructions.len());
        for pair in decompiled.blocks.windows(2) {
            assert!(pair[0].end < pair[1].start, "blocks at ${:04X} and ${:04X} overlap", pair[0].start, pair[1].start);
        }
        for block in &decompiled.blocks {
            assert!(block.body().iter().all(|insn| !insn.ends_block()));
        }
    }

    #[test]
    fn test_labels_are_defined_only_when_referenced() {
        let listing = "\
            $C000: LDA $FB\n\
            $C002: CMP #$01\n\
            $C004: BNE $C009\n\
            $C006: INC $D020\n\
            $C009: RTS\n";
        let decompiled = decompile(Target::ModernBasic, listing);

        let defined: BTreeSet<String> = decompiled
            .text
            .lines()
            .filter_map(|line| line.trim().strip_suffix(':'))
            .map(String::from)
            .collect();
        let referenced = referenced_labels(&decompiled.unit.program);
        assert_eq!(defined, referenced, "{}", decompiled.text);
        assert!(defined.contains("LABEL_C009"));
    }

    #[test]
    fn test_demo_in_modern_basic() {
        let decompiled = decompile(Target::ModernBasic, &load_demo());
        let text = &decompiled.text;
        println!("{}", text);

        assert!(text.contains("DECLARE SUB WAIT_KEY\n"));
        assert!(text.contains("FOR X = 0 TO 15\n    BORDER_COLOR = X\nNEXT X\n"));
        assert!(text.contains("CALL CLEAR_SCREEN\n"));
        assert!(text.contains("CALL WAIT_KEY\n"));
        assert!(text.contains("BACKGROUND_COLOR = A\n"));
        assert!(text.contains("SUB WAIT_KEY\n    DO\n        CALL GETIN\n    LOOP UNTIL A <> 0\n"));
        assert!(text.contains("SUB GETIN\n"));
        assert_eq!(decompiled.unit.program.count(NodeKind::Raw), 0);
    }

    #[test]
    fn test_demo_in_classic_basic() {
        let text = decompile(Target::ClassicBasic, &load_demo()).text;
        println!("{}", text);

        assert!(text.contains(" FOR X = 0 TO 15\n"));
        assert!(text.contains(" SYS 58692: REM CLEAR_SCREEN\n"));
        assert!(text.contains(" SYS 65490: REM CHROUT\n"));

        let heading = text.lines().find(|line| line.contains("==== WAIT_KEY ====")).unwrap();
        let line = heading.split_whitespace().next().unwrap();
        assert!(text.contains(&format!(" GOSUB {}\n", line)));
    }

    #[test]
    fn test_demo_in_curly() {
        let text = decompile(Target::Curly, &load_demo()).text;
        println!("{}", text);

        assert!(text.contains("#define BORDER_COLOR mem[0xD020]\n"));
        assert!(text.contains("extern void GETIN(void); /* $FFE4 */\n"));
        assert!(text.contains("void WAIT_KEY(void);\n"));
        assert!(text.contains("for (X = 0; X != 16; X++) {\n        BORDER_COLOR = X;\n    }\n"));
        assert!(text.contains("} while (A == 0);\n"));
    }

    #[test]
    fn test_demo_as_json_and_reports() {
        let decompiled = decompile(Target::Json, &load_demo());
        let value: serde_json::Value = serde_json::from_str(&decompiled.text).unwrap();
        let functions = value["program"]["children"].as_array().unwrap();
        assert_eq!(functions[0]["value"], "MAIN");
        assert!(functions.iter().any(|function| function["value"] == "WAIT_KEY"));
        assert!(value["kernal_calls"].as_object().unwrap().len() >= 3);

        for format in ReportFormat::available_formats() {
            let report = format.get_formatter().format(&decompiled.analysis()).unwrap();
            assert!(report.contains("WAIT_KEY"), "{} report lacks WAIT_KEY", format);
        }
    }

    #[test]
    fn test_run_many_over_demos() {
        let paths = vec![manifest_path("demos/border_flash.asm"); 8];
        let pipeline = shipped_pipeline(Target::ModernBasic);

        let start = Instant::now();
        let results = pipeline.run_many(&paths);
        println!("Decompiled {} listings in {:?}", results.len(), start.elapsed());

        let texts: Vec<&str> = results
            .iter()
            .map(|(path, result)| match result {
                Ok(decompiled) => decompiled.text.as_str(),
                Err(e) => panic!("{} failed: {}", path.display(), e),
            })
            .collect();
        assert!(texts.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
