//! Basic usage example of the rustabnf compiler and interpreter.

use rustabnf::{apply, load, ActionResult, Capture, Matcher};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== rustabnf Basic Usage Example ===\n");

    // Example 1: literals and rule references
    println!("Example 1: Greeting");
    let grammar1 = b"greeting = \"Hello, \" name \"!\"\n\
                     name = 1*letter\n\
                     letter = %x41-5A / %x61-7A\n";
    let rules1 = load(grammar1)?;
    let result1 = apply(&rules1, "greeting", b"Hello, World!", ())?;
    println!("Input:    'Hello, World!'");
    println!("Captures: {}\n", result1.values);

    // Example 2: greedy repetition with an unconsumed suffix
    println!("Example 2: Digits");
    let grammar2 = b"digits = 1*digit\ndigit = %x30-39\n";
    let rules2 = load(grammar2)?;
    let result2 = apply(&rules2, "digits", b"20240315 rest", ())?;
    println!("Input:    '20240315 rest'");
    println!("Consumed: {:?}", String::from_utf8_lossy(&result2.string_text));
    println!("Rest:     {:?}\n", String::from_utf8_lossy(&result2.rest));

    // Example 3: incremental alternatives
    println!("Example 3: Incremental alternatives");
    let grammar3 = b"keyword = \"if\" / \"then\"\nkeyword =/ \"else\"\n";
    let rules3 = load(grammar3)?;
    for input in [&b"if"[..], &b"then"[..], &b"else"[..]] {
        let matched = apply(&rules3, "keyword", input, ()).is_ok();
        println!("  {:8} -> {}", String::from_utf8_lossy(input), matched);
    }
    println!();

    // Example 4: a semantic action reducing the capture to an integer.
    // The !!! block travels with the grammar; the callback bound here is
    // what actually runs.
    println!("Example 4: Semantic action");
    let grammar4 = b"port = 1*digit\n\
                     !!!\n\
                     integer(text)\n\
                     !!!\n\
                     digit = %x30-39\n";
    let rules4 = load(grammar4)?;
    println!(
        "Action source carried by the rule: {:?}",
        rules4.get("port").and_then(|rule| rule.action.as_deref())
    );
    let mut matcher = Matcher::new(&rules4);
    matcher.bind("port", |text, _values, state: ()| {
        match std::str::from_utf8(text).ok().and_then(|s| s.parse().ok()) {
            Some(value) => ActionResult::Replace(state, Capture::Int(value)),
            None => ActionResult::Reject,
        }
    })?;
    let result4 = matcher.apply("port", b"5060X", ())?;
    println!("Input:    '5060X'");
    println!("Value:    {}", result4.values);
    println!("Rest:     {:?}\n", String::from_utf8_lossy(&result4.rest));

    println!("=== All examples completed successfully! ===");
    Ok(())
}
