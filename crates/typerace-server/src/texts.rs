//! The pool of candidate race texts. One is drawn uniformly at random each
//! time a race starts, and every member of the room types the same one.

pub const RACE_TEXTS: &[&str] = &[
    "The quick brown fox jumps over the lazy dog while the farmer watches \
     from the porch, wondering whether the fence needs mending before the \
     first frost arrives.",
    "Typing quickly is less about moving your fingers fast and more about \
     not stopping; a steady rhythm beats a frantic burst followed by a \
     string of corrections every single time.",
    "A small lighthouse stood at the edge of the harbor, its beam sweeping \
     across the water in slow circles, patient and indifferent to the boats \
     hurrying home ahead of the weather.",
    "Nobody remembers who installed the coffee machine on the third floor, \
     but everyone agrees that removing it now would end the project faster \
     than any missed deadline ever could.",
    "The library smelled of old paper and warm dust, and somewhere between the \
     shelves a clock ticked with the unhurried confidence of a machine that \
     had outlived every librarian who wound it.",
    "When the train finally left the station, two minutes late and half \
     empty, the man by the window opened his notebook and began to write \
     down everything he could still remember.",
];
